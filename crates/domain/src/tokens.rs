//! Signed access and refresh tokens.

use chrono::{Duration, Utc};
use common::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use store::User;

use crate::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The user id.
    pub sub: UserId,
    pub email: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

/// An access token with the refresh token that can renew it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies HS256 tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Issues a fresh access and refresh token for a user.
    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, DomainError> {
        Ok(TokenPair {
            access: self.issue(user.id, &user.email, TokenType::Access)?,
            refresh: self.issue(user.id, &user.email, TokenType::Refresh)?,
        })
    }

    /// Exchanges a valid refresh token for a new access token.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, DomainError> {
        let claims = self.verify(refresh_token, TokenType::Refresh)?;
        self.issue(claims.sub, &claims.email, TokenType::Access)
    }

    /// Verifies an access token and returns its claims.
    pub fn verify_access(&self, token: &str) -> Result<Claims, DomainError> {
        self.verify(token, TokenType::Access)
    }

    fn issue(
        &self,
        user_id: UserId,
        email: &str,
        token_type: TokenType,
    ) -> Result<String, DomainError> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| DomainError::Credential(e.to_string()))
    }

    fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, DomainError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            DomainError::Authentication("Token is invalid or expired".to_string())
        })?;
        if data.claims.token_type != expected {
            return Err(DomainError::Authentication(
                "Token has wrong type".to_string(),
            ));
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}
