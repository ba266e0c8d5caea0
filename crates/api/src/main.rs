//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use domain::{
    AccountService, Clock, LogEmailSender, MailQueue, PasswordHasher, SystemClock, TokenIssuer,
    spawn_reset_code_sweeper,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Bootstraps the admin account, starts the background tasks and serves
/// HTTP until a shutdown signal arrives.
async fn serve<S: Store>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let hasher = PasswordHasher::default();
    let (mail, mail_worker) = MailQueue::start(Arc::new(LogEmailSender));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = TokenIssuer::new(
        config.jwt_secret.as_bytes(),
        config.access_token_ttl(),
        config.refresh_token_ttl(),
    );

    if let Some((email, password)) = config.admin_credentials() {
        let accounts = AccountService::new(store.clone(), hasher.clone(), mail.clone());
        let admin = accounts.ensure_superuser(email, password).await?;
        tracing::info!(user_id = %admin.id, "bootstrap admin ready");
    }

    let state = api::create_state(store, tokens, hasher, mail, clock);
    let sweeper =
        spawn_reset_code_sweeper(state.reset.clone(), config.reset_code_sweep_interval());
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last mail queue handles; the worker drains and exits.
    sweeper.abort();
    let _ = sweeper.await;
    if let Err(e) = mail_worker.await {
        tracing::warn!(error = %e, "mail worker ended abnormally");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::info!(?config, "configuration loaded");
    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set, using the development secret");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the store and serve
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL store");
            serve(store, &config, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            serve(InMemoryStore::new(), &config, metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
