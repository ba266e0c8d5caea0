//! Application configuration loaded from environment variables.

use std::time::Duration;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string (unset: in-memory store)
/// - `JWT_SECRET`: HS256 signing secret (default: a development secret)
/// - `ACCESS_TOKEN_TTL_SECS`: access token lifetime (default: `300`)
/// - `REFRESH_TOKEN_TTL_SECS`: refresh token lifetime (default: `86400`)
/// - `RESET_CODE_SWEEP_SECS`: expired reset code sweep interval (default: `600`)
/// - `ADMIN_EMAIL` / `ADMIN_PASSWORD`: superuser created at startup if both are set
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub reset_code_sweep_secs: u64,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            jwt_secret: non_empty("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            access_token_ttl_secs: number("ACCESS_TOKEN_TTL_SECS", defaults.access_token_ttl_secs),
            refresh_token_ttl_secs: number(
                "REFRESH_TOKEN_TTL_SECS",
                defaults.refresh_token_ttl_secs,
            ),
            reset_code_sweep_secs: number("RESET_CODE_SWEEP_SECS", defaults.reset_code_sweep_secs),
            admin_email: non_empty("ADMIN_EMAIL"),
            admin_password: non_empty("ADMIN_PASSWORD"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_ttl_secs as i64)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_token_ttl_secs as i64)
    }

    pub fn reset_code_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reset_code_sweep_secs.max(1))
    }

    /// Returns the bootstrap superuser credentials when both are configured.
    pub fn admin_credentials(&self) -> Option<(&str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some((email, password)),
            _ => None,
        }
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            access_token_ttl_secs: 300,
            refresh_token_ttl_secs: 86_400,
            reset_code_sweep_secs: 600,
            admin_email: None,
            admin_password: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("database", &self.database_url.is_some())
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("reset_code_sweep_secs", &self.reset_code_sweep_secs)
            .field("admin_email", &self.admin_email)
            .finish_non_exhaustive()
    }
}
