//! JWT obtain and refresh endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::TokenPair;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ObtainRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Serialize)]
pub struct AccessResponse {
    pub access: String,
}

/// POST /api/token/ — exchange credentials for an access/refresh pair.
#[tracing::instrument(skip_all, fields(email = %req.email))]
pub async fn obtain<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ObtainRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let user = state.accounts.authenticate(&req.email, &req.password).await?;
    let pair = state.tokens.issue_pair(&user)?;
    tracing::info!(user_id = %user.id, "tokens issued");
    Ok(Json(pair))
}

/// POST /api/token/refresh/ — exchange a refresh token for a new access token.
#[tracing::instrument(skip_all)]
pub async fn refresh<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AccessResponse>, ApiError> {
    let access = state.tokens.refresh(&req.refresh)?;
    Ok(Json(AccessResponse { access }))
}
