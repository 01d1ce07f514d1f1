//! Inventory service error types.

use common::ProductId;
use thiserror::Error;

/// Errors raised while handling inventory commands.
#[derive(Debug, Error)]
pub enum InventoryServiceError {
    /// A command referenced a product this store does not know.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// Available stock cannot cover the requested quantity.
    #[error("insufficient stock for product {product_id}: available={available}, requested={requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// A reservation line asked for zero units.
    #[error("reservation quantity must be positive for product {0}")]
    ZeroQuantity(ProductId),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a product or reservation.
    #[error("corrupt inventory row: {0}")]
    CorruptRow(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker failure while emitting a reply.
    #[error("messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),
}

/// Result type for inventory service operations.
pub type Result<T> = std::result::Result<T, InventoryServiceError>;
