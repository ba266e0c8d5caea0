//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use serde::Serialize;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request input, optionally tied to a field.
    #[error("{message}")]
    BadRequest {
        field: Option<&'static str>,
        message: String,
    },

    /// The bearer token is malformed, invalid or expired.
    #[error("{0}")]
    Unauthorized(String),

    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            field: None,
            message: message.into(),
        }
    }

    pub fn bad_field(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Domain(err) => match err {
                DomainError::Validation { .. }
                | DomainError::InvalidCode
                | DomainError::ExpiredCode => StatusCode::BAD_REQUEST,
                DomainError::Authentication(_) => StatusCode::UNAUTHORIZED,
                DomainError::Forbidden => StatusCode::FORBIDDEN,
                DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::Credential(_) | DomainError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("api_errors_total", "status" => status.as_str().to_owned()).increment(1);
        let body = match &self {
            ApiError::BadRequest { field, message } => ErrorBody {
                error: message.clone(),
                field: *field,
            },
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, "internal server error");
                ErrorBody {
                    error: "Internal server error".to_string(),
                    field: None,
                }
            }
            ApiError::Domain(DomainError::NotFound { entity, .. }) => {
                tracing::debug!(error = %self, "not found");
                ErrorBody {
                    error: format!("{} not found.", capitalize(entity)),
                    field: None,
                }
            }
            ApiError::Domain(err) => ErrorBody {
                error: err.to_string(),
                field: err.field(),
            },
            ApiError::Unauthorized(message) => ErrorBody {
                error: message.clone(),
                field: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
