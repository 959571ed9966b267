//! Saga error types.

use common::SagaId;
use state_store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The state store failed to read or write a checkpoint.
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// A saga record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A definition names an activity type that was never registered.
    #[error("Unknown activity type: {0}")]
    UnknownActivityType(String),

    /// A definition's configuration does not match the activity's config type.
    #[error("Invalid configuration for activity '{activity_type}': {source}")]
    InvalidActivityConfig {
        activity_type: String,
        source: serde_json::Error,
    },

    /// A definition carries configuration for an activity that takes none.
    #[error("Activity '{0}' does not accept configuration")]
    ConfigNotAccepted(String),

    /// A loaded record violates the saga state invariants.
    #[error("Corrupt state for saga {saga_id}: {reason}")]
    CorruptState { saga_id: SagaId, reason: String },

    /// The reminder service failed to register or cancel a reminder.
    #[error("Reminder error: {0}")]
    Reminder(String),

    /// The saga's worker has shut down and can no longer accept commands.
    #[error("Saga worker unavailable: {0}")]
    WorkerUnavailable(SagaId),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
