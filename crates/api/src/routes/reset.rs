//! Password reset code endpoints. Both are open to anonymous callers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::MessageResponse;

#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// POST /send-reset-code/ — issue a code and mail it.
#[tracing::instrument(skip_all)]
pub async fn send_code<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<SendCodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.reset.issue(&req.email).await?;
    Ok(Json(MessageResponse {
        message: "Code has been sent to your email",
    }))
}

/// POST /reset-password/ — consume a code and set the new password.
#[tracing::instrument(skip_all)]
pub async fn reset_password<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .reset
        .consume(&req.email, &req.code, &req.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password has been successfully changed",
    }))
}
