//! The messaging fabric: a durable topic-routed pub/sub contract with
//! persistent messages, manual acknowledgement, and dead-lettering after
//! bounded retries.
//!
//! Routing keys follow the shape `saga.<publisher_service>.<event_type>`.
//! Delivery is at-least-once; duplicates are expected and every consumer in
//! this workspace is idempotent.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod payloads;
pub mod publisher;

pub use bus::{Delivery, MessageBus, MessageHeaders, OutboundMessage, QueueBinding};
pub use config::BrokerConfig;
pub use consumer::{Consumer, EventHandler, HandlerError};
pub use envelope::{EventType, SagaEvent};
pub use error::{MessagingError, Result};
pub use memory::InMemoryBroker;
pub use publisher::Publisher;

/// Canonical service names used in envelopes and routing keys.
pub mod service {
    pub const ORCHESTRATOR: &str = "saga-orchestrator";
    pub const ORDER: &str = "order-service";
    pub const PAYMENT: &str = "payment-service";
    pub const INVENTORY: &str = "inventory-service";
    pub const SHIPPING: &str = "shipping-service";
    pub const NOTIFICATION: &str = "notification-service";
}
