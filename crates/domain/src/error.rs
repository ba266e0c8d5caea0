//! Domain error types.

use store::StoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed a validation rule.
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Credentials were missing, wrong or expired.
    #[error("{0}")]
    Authentication(String),

    /// The caller is authenticated but lacks the required role.
    #[error("You do not have permission to perform this action.")]
    Forbidden,

    /// The resource does not exist or is not visible to the caller.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// No reset code matches the submitted email and code.
    #[error("Invalid code")]
    InvalidCode,

    /// The matching reset code is past its validity window.
    #[error("The code is expired")]
    ExpiredCode,

    /// Password hashing or token signing failed.
    #[error("Credential error: {0}")]
    Credential(String),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The field a validation-style error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DomainError::Validation { field, .. } => Some(field),
            DomainError::InvalidCode | DomainError::ExpiredCode => Some("code"),
            _ => None,
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => DomainError::NotFound { entity, id },
            StoreError::UniqueViolation { entity, field } => DomainError::Validation {
                field,
                message: format!("{entity} with this {field} already exists."),
            },
            other => DomainError::Store(other),
        }
    }
}
