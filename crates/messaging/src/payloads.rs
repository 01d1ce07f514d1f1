//! Typed payload shapes for commands and replies.
//!
//! Envelopes carry payloads as open JSON mappings; handlers project them into
//! these structs on receipt via [`SagaEvent::payload_as`](crate::SagaEvent).

use common::{CustomerId, Money, OrderId, ProductId};
use domain::{
    InventoryReservation, Notification, NotificationType, Order, OrderItem, Payment, Shipment,
    ShippingAddress,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Commands emitted by the orchestrator
// ---------------------------------------------------------------------------

/// `payment.process`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessCommand {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub payment_method: String,
}

/// `payment.refund`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub amount: Money,
    pub reason: String,
}

/// `inventory.reserve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReserveCommand {
    pub order_id: OrderId,
    pub items: Vec<ReserveItem>,
}

/// One line of an `inventory.reserve` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// `inventory.release`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReleaseCommand {
    #[serde(default)]
    pub reservation_ids: Vec<Uuid>,
    pub reason: String,
}

/// `shipping.create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingCreateCommand {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub address: ShippingAddress,
}

/// `shipping.cancel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingCancelCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<Uuid>,
    pub reason: String,
}

/// `notification.send`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSendCommand {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
}

/// `order.cancel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelCommand {
    pub order_id: OrderId,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Replies emitted by the participants
// ---------------------------------------------------------------------------

/// `order.created` — carries the full order snapshot that seeds the saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order: Order,
}

/// `payment.processed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessedPayload {
    pub payment: Payment,
}

/// `payment.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedPayload {
    pub order_id: OrderId,
    pub reason: String,
    pub amount: Money,
}

/// `payment.refunded`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundedPayload {
    pub payment_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_reference: Option<String>,
    pub refunded_amount: Money,
    pub total_refunded: Money,
}

/// `inventory.reserved`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservedPayload {
    pub reservations: Vec<InventoryReservation>,
}

/// `inventory.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFailedPayload {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    pub reason: String,
}

/// `inventory.released`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReleasedPayload {
    pub order_id: OrderId,
    pub reservation_ids: Vec<Uuid>,
}

/// `shipping.created`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingCreatedPayload {
    pub shipment: Shipment,
}

/// `shipping.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingFailedPayload {
    pub order_id: OrderId,
    pub reason: String,
}

/// `shipping.cancelled`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingCancelledPayload {
    pub shipment_id: Uuid,
    pub tracking_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `notification.sent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSentPayload {
    pub notification: Notification,
}

/// `notification.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFailedPayload {
    pub order_id: OrderId,
    pub reason: String,
}

/// `order.completed` — terminal event published by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedPayload {
    pub order_id: OrderId,
    pub status: String,
}

/// `order.cancelled` — terminal event published by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledPayload {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Generic payload for `*.cancel.failed` / `*.release.failed` /
/// `payment.refund.failed` replies that leave a saga stuck in compensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationFailedPayload {
    pub reason: String,
}
