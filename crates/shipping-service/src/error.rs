//! Shipping service error types.

use common::OrderId;
use thiserror::Error;

/// Errors raised while handling shipping commands.
#[derive(Debug, Error)]
pub enum ShippingServiceError {
    /// A shipment already exists for the order (uniqueness on `order_id`).
    #[error("shipment already exists for order {0}")]
    DuplicateOrder(OrderId),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a shipment.
    #[error("corrupt shipment row: {0}")]
    CorruptRow(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker failure while emitting a reply.
    #[error("messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),
}

/// Result type for shipping service operations.
pub type Result<T> = std::result::Result<T, ShippingServiceError>;
