//! HTTP handlers, grouped by resource.

pub mod accounts;
pub mod carts;
pub mod catalog;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod reset;
pub mod tokens;

use std::str::FromStr;

use serde::Serialize;

use crate::error::ApiError;

/// Parses a UUID path segment into a typed id.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::bad_request(format!("Invalid ID format: {e}")))
}

/// A `{"message": ...}` acknowledgement.
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Rejects a full replacement that leaves out a required field.
pub(crate) fn required<T>(field: &'static str, value: Option<T>) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::bad_field(field, "This field is required."))
}
