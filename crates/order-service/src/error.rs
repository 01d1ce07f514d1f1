//! Order service error types.

use common::OrderId;
use thiserror::Error;

/// Errors raised while creating or finalizing orders.
#[derive(Debug, Error)]
pub enum OrderServiceError {
    /// The order request violated a domain rule (no items, non-positive
    /// total).
    #[error("invalid order: {0}")]
    InvalidOrder(#[from] domain::OrderError),

    /// The referenced order does not exist.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to an order.
    #[error("corrupt order row: {0}")]
    CorruptRow(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker failure while emitting the start event.
    #[error("messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),
}

/// Result type for order service operations.
pub type Result<T> = std::result::Result<T, OrderServiceError>;
