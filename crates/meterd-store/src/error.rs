//! Error types for meterd storage.

use meterd_core::MeterError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed. Retryable by the caller.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("account", "plan", "period", "invoice", ...).
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Duplicate event (idempotency check failed).
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event ID that was duplicated.
        event_id: String,
    },
}

impl From<StoreError> for MeterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) => Self::TransientStorage(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::DuplicateEvent { event_id } => Self::DuplicateEvent { event_id },
        }
    }
}
