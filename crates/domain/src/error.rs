//! Domain rule violations.

use common::Money;
use thiserror::Error;

/// A status string read from storage or the wire did not match any variant.
#[derive(Debug, Clone, Error)]
#[error("unknown status: {0}")]
pub struct StatusParseError(pub String);

/// Errors raised when constructing or mutating an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order must contain at least one item.
    #[error("order has no items")]
    EmptyOrder,

    /// The computed total must be strictly positive.
    #[error("order total must be positive, got {0}")]
    NonPositiveTotal(Money),
}

/// Errors raised by payment state transitions.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Refunds are only allowed from the completed state.
    #[error("only completed payments can be refunded, current status: {0}")]
    NotRefundable(String),

    /// Refund amount is zero, negative, or above what remains.
    #[error("invalid refund amount: {requested}, remaining: {remaining}")]
    InvalidRefundAmount { requested: Money, remaining: Money },
}

/// Errors raised by stock mutations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Requested quantity exceeds the available (unreserved) stock.
    #[error("insufficient stock: available={available}, requested={requested}")]
    InsufficientStock { available: u32, requested: u32 },

    /// A reservation must hold at least one unit.
    #[error("reservation quantity must be positive")]
    ZeroQuantity,
}

/// Errors raised by shipment state transitions.
#[derive(Debug, Error)]
pub enum ShippingError {
    /// Cancellation is only allowed while the shipment is pending or preparing.
    #[error("cannot cancel shipment in status: {0}")]
    CancelNotAllowed(String),
}
