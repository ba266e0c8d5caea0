//! Account registration and management endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::UserId;
use domain::{AccountUpdate, Registration};
use serde::{Deserialize, Serialize};
use store::{Store, User};

use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::routes::{parse_id, required};

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Deserialize, Default)]
pub struct AccountPayload {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

impl From<AccountPayload> for AccountUpdate {
    fn from(payload: AccountPayload) -> Self {
        AccountUpdate {
            email: payload.email,
            password: payload.password,
            first_name: payload.first_name,
            last_name: payload.last_name,
            phone_number: payload.phone_number,
        }
    }
}

// -- Response types --

/// An account as clients see it. The password hash never leaves the server.
#[derive(Serialize)]
pub struct AccountResponse {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for AccountResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
            is_staff: user.is_staff,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct AccountEnvelope {
    pub data: AccountResponse,
    pub message: &'static str,
}

// -- Handlers --

/// POST /accounts/ — register a new account. Open to anonymous callers.
#[tracing::instrument(skip_all, fields(email = %req.email))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AccountEnvelope>), ApiError> {
    let user = state
        .accounts
        .register(Registration {
            email: req.email,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            phone_number: req.phone_number,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AccountEnvelope {
            data: user.into(),
            message: "User created successfully",
        }),
    ))
}

/// GET /accounts/ — every account for staff, otherwise only the caller's.
#[tracing::instrument(skip_all)]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    let users = state.accounts.list(&actor).await?;
    Ok(Json(users.into_iter().map(AccountResponse::from).collect()))
}

/// GET /accounts/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user = state.accounts.get(&actor, parse_id(&id)?).await?;
    Ok(Json(user.into()))
}

/// PUT /accounts/{id}/ — replace the profile; the password stays optional.
#[tracing::instrument(skip_all, fields(%id))]
pub async fn replace<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(payload): Json<AccountPayload>,
) -> Result<Json<AccountEnvelope>, ApiError> {
    let user_id = parse_id(&id)?;
    let update = AccountUpdate {
        email: Some(required("email", payload.email)?),
        password: payload.password,
        first_name: Some(required("first_name", payload.first_name)?),
        last_name: Some(required("last_name", payload.last_name)?),
        phone_number: Some(required("phone_number", payload.phone_number)?),
    };
    let user = state.accounts.update(&actor, user_id, update).await?;
    Ok(Json(AccountEnvelope {
        data: user.into(),
        message: "User updated successfully",
    }))
}

/// PATCH /accounts/{id}/ — change only the supplied fields.
#[tracing::instrument(skip_all, fields(%id))]
pub async fn patch<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(payload): Json<AccountPayload>,
) -> Result<Json<AccountEnvelope>, ApiError> {
    let user = state
        .accounts
        .update(&actor, parse_id(&id)?, payload.into())
        .await?;
    Ok(Json(AccountEnvelope {
        data: user.into(),
        message: "User updated successfully",
    }))
}

/// DELETE /accounts/{id}/ — removes the account with its cart and orders.
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.accounts.delete(&actor, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
