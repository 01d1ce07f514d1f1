//! The event envelope and the recognized event types.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Every event type that travels over the bus.
///
/// Serialized as its `<domain>.<action>` wire string. Unrecognized strings
/// deserialize into [`EventType::Other`] so a consumer can log-and-ack them
/// instead of dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    // Order lifecycle
    OrderCreated,
    OrderCompleted,
    OrderCancelled,
    OrderCancel,

    // Payment
    PaymentProcess,
    PaymentProcessed,
    PaymentFailed,
    PaymentRefund,
    PaymentRefunded,
    PaymentRefundFailed,

    // Inventory
    InventoryReserve,
    InventoryReserved,
    InventoryFailed,
    InventoryRelease,
    InventoryReleased,
    InventoryReleaseFailed,

    // Shipping
    ShippingCreate,
    ShippingCreated,
    ShippingFailed,
    ShippingCancel,
    ShippingCancelled,
    ShippingCancelFailed,

    // Notification
    NotificationSend,
    NotificationSent,
    NotificationFailed,

    /// Anything this service does not recognize.
    Other(String),
}

impl EventType {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderCompleted => "order.completed",
            EventType::OrderCancelled => "order.cancelled",
            EventType::OrderCancel => "order.cancel",
            EventType::PaymentProcess => "payment.process",
            EventType::PaymentProcessed => "payment.processed",
            EventType::PaymentFailed => "payment.failed",
            EventType::PaymentRefund => "payment.refund",
            EventType::PaymentRefunded => "payment.refunded",
            EventType::PaymentRefundFailed => "payment.refund.failed",
            EventType::InventoryReserve => "inventory.reserve",
            EventType::InventoryReserved => "inventory.reserved",
            EventType::InventoryFailed => "inventory.failed",
            EventType::InventoryRelease => "inventory.release",
            EventType::InventoryReleased => "inventory.released",
            EventType::InventoryReleaseFailed => "inventory.release.failed",
            EventType::ShippingCreate => "shipping.create",
            EventType::ShippingCreated => "shipping.created",
            EventType::ShippingFailed => "shipping.failed",
            EventType::ShippingCancel => "shipping.cancel",
            EventType::ShippingCancelled => "shipping.cancelled",
            EventType::ShippingCancelFailed => "shipping.cancel.failed",
            EventType::NotificationSend => "notification.send",
            EventType::NotificationSent => "notification.sent",
            EventType::NotificationFailed => "notification.failed",
            EventType::Other(s) => s,
        }
    }

    /// Parses a wire string, mapping unknown values to [`EventType::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "order.created" => EventType::OrderCreated,
            "order.completed" => EventType::OrderCompleted,
            "order.cancelled" => EventType::OrderCancelled,
            "order.cancel" => EventType::OrderCancel,
            "payment.process" => EventType::PaymentProcess,
            "payment.processed" => EventType::PaymentProcessed,
            "payment.failed" => EventType::PaymentFailed,
            "payment.refund" => EventType::PaymentRefund,
            "payment.refunded" => EventType::PaymentRefunded,
            "payment.refund.failed" => EventType::PaymentRefundFailed,
            "inventory.reserve" => EventType::InventoryReserve,
            "inventory.reserved" => EventType::InventoryReserved,
            "inventory.failed" => EventType::InventoryFailed,
            "inventory.release" => EventType::InventoryRelease,
            "inventory.released" => EventType::InventoryReleased,
            "inventory.release.failed" => EventType::InventoryReleaseFailed,
            "shipping.create" => EventType::ShippingCreate,
            "shipping.created" => EventType::ShippingCreated,
            "shipping.failed" => EventType::ShippingFailed,
            "shipping.cancel" => EventType::ShippingCancel,
            "shipping.cancelled" => EventType::ShippingCancelled,
            "shipping.cancel.failed" => EventType::ShippingCancelFailed,
            "notification.send" => EventType::NotificationSend,
            "notification.sent" => EventType::NotificationSent,
            "notification.failed" => EventType::NotificationFailed,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventType::parse(&s))
    }
}

/// The wire envelope carried by every message on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaEvent {
    pub id: Uuid,
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub service: String,
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl SagaEvent {
    /// Creates a fully populated envelope with a serialized payload.
    pub fn new<P: Serialize>(
        service: impl Into<String>,
        event_type: EventType,
        saga_id: SagaId,
        order_id: OrderId,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            saga_id,
            order_id,
            event_type,
            payload: serde_json::to_value(payload)?,
            service: service.into(),
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        })
    }

    /// Returns the routing key for this envelope:
    /// `saga.<publisher_service>.<event_type>`.
    pub fn routing_key(&self) -> String {
        format!("saga.{}.{}", self.service, self.event_type)
    }

    /// Projects the open payload mapping into a typed request.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_all_recognized_values() {
        let all = [
            "order.created",
            "order.completed",
            "order.cancelled",
            "order.cancel",
            "payment.process",
            "payment.processed",
            "payment.failed",
            "payment.refund",
            "payment.refunded",
            "payment.refund.failed",
            "inventory.reserve",
            "inventory.reserved",
            "inventory.failed",
            "inventory.release",
            "inventory.released",
            "inventory.release.failed",
            "shipping.create",
            "shipping.created",
            "shipping.failed",
            "shipping.cancel",
            "shipping.cancelled",
            "shipping.cancel.failed",
            "notification.send",
            "notification.sent",
            "notification.failed",
        ];
        for s in all {
            let parsed = EventType::parse(s);
            assert!(!matches!(parsed, EventType::Other(_)), "unrecognized: {s}");
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn unknown_event_type_becomes_other() {
        let parsed = EventType::parse("warehouse.audit");
        assert_eq!(parsed, EventType::Other("warehouse.audit".to_string()));
        assert_eq!(parsed.as_str(), "warehouse.audit");
    }

    #[test]
    fn event_type_serializes_as_wire_string() {
        let json = serde_json::to_string(&EventType::PaymentProcess).unwrap();
        assert_eq!(json, "\"payment.process\"");

        let back: EventType = serde_json::from_str("\"payment.processed\"").unwrap();
        assert_eq!(back, EventType::PaymentProcessed);
    }

    #[test]
    fn envelope_round_trip() {
        let event = SagaEvent::new(
            "payment-service",
            EventType::PaymentProcessed,
            SagaId::new(),
            OrderId::new(),
            &serde_json::json!({"amount": 259998}),
        )
        .unwrap();

        let json = serde_json::to_string(&event).unwrap();
        let back: SagaEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, event.id);
        assert_eq!(back.saga_id, event.saga_id);
        assert_eq!(back.event_type, EventType::PaymentProcessed);
        assert_eq!(back.payload["amount"], 259998);
    }

    #[test]
    fn routing_key_shape() {
        let event = SagaEvent::new(
            "saga-orchestrator",
            EventType::PaymentProcess,
            SagaId::new(),
            OrderId::new(),
            &serde_json::json!({}),
        )
        .unwrap();

        assert_eq!(
            event.routing_key(),
            "saga.saga-orchestrator.payment.process"
        );
    }
}
