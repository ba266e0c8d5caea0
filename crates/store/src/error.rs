use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A unique constraint would be violated.
    #[error("{entity} with this {field} already exists")]
    UniqueViolation {
        entity: &'static str,
        field: &'static str,
    },

    /// A conditional write found the row no longer in the expected state.
    #[error("{entity} {id} was changed concurrently")]
    Conflict { entity: &'static str, id: String },

    /// A stored value could not be mapped back into a model.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
