//! Consuming side of the fabric.
//!
//! Messages are delivered one at a time to a handler. Handler success acks;
//! handler failure republishes the same body and headers with an incremented
//! redelivery count (up to the threshold) and then acks the original, which
//! counts as a retry. At the threshold, or on a malformed payload, the
//! message is rejected to the dead-letter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::bus::{Delivery, MessageBus, OutboundMessage, QueueBinding};
use crate::envelope::SagaEvent;
use crate::error::Result;

/// Redeliveries allowed before a message is dead-lettered.
const MAX_REDELIVERIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Boxed error returned by event handlers.
///
/// A returned error means "retry me": the consumer republishes the message
/// until the redelivery threshold. Handlers that want a message dropped
/// (unknown event, unknown saga) log and return `Ok`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A service's entry point for inbound saga events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError>;
}

/// Drives a queue subscription, delivering events to a handler until the
/// shutdown signal flips.
pub struct Consumer {
    bus: Arc<dyn MessageBus>,
    queue: String,
    service: String,
    retry_delay: Duration,
}

impl Consumer {
    /// Creates a consumer for a service's queue.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        queue: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            queue: queue.into(),
            service: service.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Overrides the delay before a retry republish.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Binds the queue to the given routing-key patterns and consumes until
    /// the shutdown signal turns true or the broker closes.
    ///
    /// On shutdown no new messages are taken; the in-flight handler runs to
    /// completion first.
    pub async fn run<H: EventHandler>(
        self,
        patterns: Vec<String>,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut deliveries = self
            .bus
            .subscribe(QueueBinding::new(self.queue.clone(), patterns))
            .await?;
        tracing::info!(queue = %self.queue, service = %self.service, "consuming events");

        loop {
            tokio::select! {
                maybe = deliveries.recv() => match maybe {
                    Some(delivery) => self.handle_delivery(delivery, handler.as_ref()).await,
                    None => {
                        tracing::info!(queue = %self.queue, "queue channel closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(queue = %self.queue, "shutdown signal received, consumer stopping");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_delivery<H: EventHandler>(&self, delivery: Delivery, handler: &H) {
        let event: SagaEvent = match serde_json::from_str(&delivery.message.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    queue = %self.queue,
                    error = %e,
                    "malformed payload, rejecting to dead letter"
                );
                delivery.reject().await;
                return;
            }
        };

        tracing::debug!(
            queue = %self.queue,
            event_type = %event.event_type,
            from = %event.service,
            "event received"
        );

        match handler.handle(event).await {
            Ok(()) => delivery.ack().await,
            Err(e) => {
                let redeliveries = delivery.redeliveries();
                if redeliveries < MAX_REDELIVERIES {
                    tracing::warn!(
                        queue = %self.queue,
                        redeliveries,
                        error = %e,
                        "handler failed, republishing for retry"
                    );
                    self.republish(delivery).await;
                } else {
                    tracing::error!(
                        queue = %self.queue,
                        redeliveries,
                        error = %e,
                        "retry threshold reached, rejecting to dead letter"
                    );
                    delivery.reject().await;
                }
            }
        }
    }

    /// Republishes the same body and headers with an incremented redelivery
    /// count after a short delay, then acks the original delivery.
    async fn republish(&self, delivery: Delivery) {
        tokio::time::sleep(self.retry_delay).await;

        let mut headers = delivery.message.headers.clone();
        headers.redeliveries += 1;
        let retry = OutboundMessage {
            body: delivery.message.body.clone(),
            content_type: delivery.message.content_type,
            headers,
        };

        match self.bus.publish(&delivery.routing_key, retry).await {
            Ok(()) => delivery.ack().await,
            Err(e) => {
                tracing::error!(error = %e, "retry republish failed, rejecting");
                delivery.reject().await;
            }
        }
    }
}
