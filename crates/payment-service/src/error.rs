//! Payment service error types.

use common::OrderId;
use thiserror::Error;

/// Errors raised while handling payment commands.
#[derive(Debug, Error)]
pub enum PaymentServiceError {
    /// A payment already exists for the order (uniqueness on `order_id`).
    #[error("payment already exists for order {0}")]
    DuplicateOrder(OrderId),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a payment.
    #[error("corrupt payment row: {0}")]
    CorruptRow(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker failure while emitting a reply.
    #[error("messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),
}

/// Result type for payment service operations.
pub type Result<T> = std::result::Result<T, PaymentServiceError>;
