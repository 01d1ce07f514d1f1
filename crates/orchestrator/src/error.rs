//! Orchestrator error types.

use common::{OrderId, SagaId};
use messaging::MessagingError;
use thiserror::Error;

/// Errors that can occur while driving a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An inbound event references a saga this store has never seen.
    #[error("saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A saga already exists for the order.
    #[error("saga already exists for order {0}")]
    DuplicateSaga(OrderId),

    /// An optimistic update lost the race; the caller should retry and will
    /// observe the already-advanced state.
    #[error("concurrency conflict for saga {saga_id} at version {expected}")]
    ConcurrencyConflict { saga_id: SagaId, expected: i64 },

    /// The start event payload did not contain a usable order snapshot.
    #[error("invalid saga start payload: {0}")]
    InvalidStartPayload(String),

    /// The saga state lacks what the next command needs.
    #[error("saga {saga_id} cannot emit a command: {reason}")]
    CommandUnavailable { saga_id: SagaId, reason: String },

    /// A stored row could not be mapped back to a saga.
    #[error("corrupt saga row: {0}")]
    CorruptRow(String),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload or state (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker failure while emitting a command or terminal event.
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, SagaError>;
