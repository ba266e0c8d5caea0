//! Bearer token authentication.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use domain::Actor;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

/// The caller of a request.
///
/// A request without an `Authorization` header is anonymous. A header that
/// is present but not a valid `Bearer` access token is rejected with 401.
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

impl<S: Store> FromRequestParts<Arc<AppState<S>>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Caller(Actor::Anonymous));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ApiError::Unauthorized("Authorization header must be 'Bearer <token>'".to_string())
            })?;

        let claims = state.tokens.verify_access(token)?;
        let user = state.accounts.resolve(claims.sub).await?;
        Ok(Caller(Actor::User(user)))
    }
}
