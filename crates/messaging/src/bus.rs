//! The broker abstraction: `publish`, `subscribe`, `close`.
//!
//! Keeping the surface this small lets a process share one broker client
//! between its publisher and consumer and swap the transport without touching
//! any handler.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Content type attached to every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Message headers mirrored from the envelope, plus the redelivery count the
/// consumer uses to decide between retry and dead-letter.
#[derive(Debug, Clone)]
pub struct MessageHeaders {
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub correlation_id: Uuid,
    pub service: String,
    pub event_type: String,
    pub redeliveries: u32,
}

/// A message on its way to the broker: serialized JSON body plus headers.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: String,
    pub content_type: &'static str,
    pub headers: MessageHeaders,
}

/// A queue and the routing-key patterns bound to it.
///
/// Patterns use topic syntax: `*` matches exactly one dot-separated segment,
/// `#` matches zero or more. Event types themselves contain a dot, so a
/// service binding to everything another service publishes uses
/// `saga.<service>.#`.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub queue: String,
    pub patterns: Vec<String>,
}

impl QueueBinding {
    /// Creates a binding for a queue with the given patterns.
    pub fn new(queue: impl Into<String>, patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            queue: queue.into(),
            patterns: patterns.into_iter().collect(),
        }
    }
}

/// Acknowledgement hook handed out with each delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirms successful processing; the broker forgets the message.
    async fn ack(&self);

    /// Rejects the message without requeueing; the broker routes it to the
    /// dead-letter store.
    async fn reject(&self);
}

/// A message delivered from a bound queue, awaiting manual acknowledgement.
pub struct Delivery {
    pub routing_key: String,
    pub message: OutboundMessage,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a delivery. Used by broker implementations.
    pub fn new(
        routing_key: impl Into<String>,
        message: OutboundMessage,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            message,
            acker,
        }
    }

    /// Returns how many times this message has been redelivered.
    pub fn redeliveries(&self) -> u32 {
        self.message.headers.redeliveries
    }

    /// Acknowledges the message.
    pub async fn ack(self) {
        self.acker.ack().await;
    }

    /// Rejects the message to the dead-letter store.
    pub async fn reject(self) {
        self.acker.reject().await;
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("redeliveries", &self.message.headers.redeliveries)
            .finish()
    }
}

/// The broker contract shared by all transports.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message under a routing key. Persistent delivery; every
    /// queue whose binding matches receives its own copy.
    async fn publish(&self, routing_key: &str, message: OutboundMessage) -> Result<()>;

    /// Binds a durable queue and starts delivering matching messages one at a
    /// time. Re-subscribing an existing queue replaces its consumer, which is
    /// how a reconnect resumes consumption.
    async fn subscribe(&self, binding: QueueBinding) -> Result<mpsc::UnboundedReceiver<Delivery>>;

    /// Closes the connection; in-flight deliveries may still be acked.
    async fn close(&self) -> Result<()>;
}
