//! In-memory broker implementation.
//!
//! Provides the same topic-exchange semantics as the production transport:
//! pattern-bound durable queues, per-message acknowledgement, a dead-letter
//! store, and a publish log that tests use to assert on emitted traffic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::bus::{Acknowledger, Delivery, MessageBus, OutboundMessage, QueueBinding};
use crate::error::{MessagingError, Result};

/// A message that exceeded its retry budget or was rejected outright.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub routing_key: String,
    pub body: String,
}

#[derive(Debug, Clone)]
struct PendingDelivery {
    queue: String,
    routing_key: String,
    body: String,
}

struct QueueEntry {
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueEntry>,
    unacked: HashMap<u64, PendingDelivery>,
    dead_letters: Vec<DeadLetter>,
    publish_log: Vec<String>,
    next_delivery_id: u64,
    closed: bool,
}

/// In-memory topic broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of dead-lettered messages.
    pub async fn dead_letter_count(&self) -> usize {
        self.state.read().await.dead_letters.len()
    }

    /// Returns the dead-lettered messages for inspection.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.read().await.dead_letters.clone()
    }

    /// Returns how many messages have been published under a routing key.
    pub async fn published_count(&self, routing_key: &str) -> usize {
        self.state
            .read()
            .await
            .publish_log
            .iter()
            .filter(|k| k.as_str() == routing_key)
            .count()
    }

    /// Returns the number of delivered-but-unacknowledged messages.
    pub async fn unacked_count(&self) -> usize {
        self.state.read().await.unacked.len()
    }

    /// Returns the number of bound queues.
    pub async fn queue_count(&self) -> usize {
        self.state.read().await.queues.len()
    }
}

#[async_trait]
impl MessageBus for InMemoryBroker {
    async fn publish(&self, routing_key: &str, message: OutboundMessage) -> Result<()> {
        let mut guard = self.state.write().await;
        if guard.closed {
            return Err(MessagingError::Closed);
        }

        guard.publish_log.push(routing_key.to_string());

        let matching: Vec<String> = guard
            .queues
            .iter()
            .filter(|(_, entry)| {
                entry
                    .patterns
                    .iter()
                    .any(|p| topic_matches(p, routing_key))
            })
            .map(|(name, _)| name.clone())
            .collect();

        if matching.is_empty() {
            tracing::debug!(routing_key, "no queue bound for routing key, dropping");
            return Ok(());
        }

        for queue in matching {
            let delivery_id = guard.next_delivery_id;
            guard.next_delivery_id += 1;
            guard.unacked.insert(
                delivery_id,
                PendingDelivery {
                    queue: queue.clone(),
                    routing_key: routing_key.to_string(),
                    body: message.body.clone(),
                },
            );

            let acker = Arc::new(MemoryAcker {
                state: self.state.clone(),
                delivery_id,
            });
            let delivery = Delivery::new(routing_key, message.clone(), acker);

            let sent = guard
                .queues
                .get(&queue)
                .map(|entry| entry.sender.send(delivery).is_ok())
                .unwrap_or(false);
            if !sent {
                // Consumer went away; the message cannot be delivered.
                guard.unacked.remove(&delivery_id);
                tracing::debug!(routing_key, queue, "queue consumer dropped");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, binding: QueueBinding) -> Result<mpsc::UnboundedReceiver<Delivery>> {
        let mut guard = self.state.write().await;
        if guard.closed {
            return Err(MessagingError::Subscribe("broker is closed".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        guard.queues.insert(
            binding.queue.clone(),
            QueueEntry {
                patterns: binding.patterns,
                sender: tx,
            },
        );
        tracing::debug!(queue = %binding.queue, "queue bound");
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.closed = true;
        guard.queues.clear();
        Ok(())
    }
}

struct MemoryAcker {
    state: Arc<RwLock<BrokerState>>,
    delivery_id: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) {
        self.state.write().await.unacked.remove(&self.delivery_id);
    }

    async fn reject(&self) {
        let mut guard = self.state.write().await;
        if let Some(pending) = guard.unacked.remove(&self.delivery_id) {
            guard.dead_letters.push(DeadLetter {
                queue: pending.queue,
                routing_key: pending.routing_key,
                body: pending.body,
            });
        }
    }
}

/// Topic pattern matching: `*` matches exactly one dot-separated segment,
/// `#` matches zero or more.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                (0..=key.len()).any(|skip| matches(&pattern[1..], &key[skip..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(&expected), Some(&actual)) if expected == actual => {
                matches(&pattern[1..], &key[1..])
            }
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage {
            body: body.to_string(),
            content_type: crate::bus::CONTENT_TYPE_JSON,
            headers: crate::bus::MessageHeaders {
                saga_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
                correlation_id: Uuid::new_v4(),
                service: "test".to_string(),
                event_type: "test.event".to_string(),
                redeliveries: 0,
            },
        }
    }

    #[test]
    fn topic_matching_rules() {
        assert!(topic_matches("saga.payment-service.#", "saga.payment-service.payment.processed"));
        assert!(topic_matches("saga.*.payment.processed", "saga.payment-service.payment.processed"));
        assert!(topic_matches("#", "saga.order-service.order.created"));
        assert!(topic_matches("saga.#", "saga.order-service.order.created"));
        assert!(topic_matches("saga.order-service.#", "saga.order-service.order.created"));

        // '*' is exactly one segment
        assert!(!topic_matches("saga.payment-service.*", "saga.payment-service.payment.processed"));
        assert!(topic_matches("saga.payment-service.*.*", "saga.payment-service.payment.processed"));

        assert!(!topic_matches("saga.order-service.#", "saga.payment-service.payment.failed"));
        assert!(!topic_matches("saga.order-service.order.created", "saga.order-service.order.cancelled"));
        assert!(topic_matches("saga.order-service.order.created", "saga.order-service.order.created"));
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_queue() {
        let broker = InMemoryBroker::new();
        let mut rx = broker
            .subscribe(QueueBinding::new(
                "orchestrator",
                vec!["saga.payment-service.#".to_string()],
            ))
            .await
            .unwrap();

        broker
            .publish("saga.payment-service.payment.processed", message("{}"))
            .await
            .unwrap();

        let delivery = rx.try_recv().unwrap();
        assert_eq!(delivery.routing_key, "saga.payment-service.payment.processed");
        assert_eq!(broker.unacked_count().await, 1);

        delivery.ack().await;
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_matching_queues() {
        let broker = InMemoryBroker::new();
        let mut a = broker
            .subscribe(QueueBinding::new("a", vec!["saga.#".to_string()]))
            .await
            .unwrap();
        let mut b = broker
            .subscribe(QueueBinding::new(
                "b",
                vec!["saga.orchestrator.#".to_string()],
            ))
            .await
            .unwrap();

        broker
            .publish("saga.orchestrator.order.completed", message("{}"))
            .await
            .unwrap();

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unmatched_message_is_dropped() {
        let broker = InMemoryBroker::new();
        let mut rx = broker
            .subscribe(QueueBinding::new(
                "orchestrator",
                vec!["saga.payment-service.#".to_string()],
            ))
            .await
            .unwrap();

        broker
            .publish("saga.shipping-service.shipping.created", message("{}"))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn reject_routes_to_dead_letter_store() {
        let broker = InMemoryBroker::new();
        let mut rx = broker
            .subscribe(QueueBinding::new("q", vec!["#".to_string()]))
            .await
            .unwrap();

        broker.publish("saga.x.y.z", message("bad")).await.unwrap();
        let delivery = rx.try_recv().unwrap();
        delivery.reject().await;

        assert_eq!(broker.dead_letter_count().await, 1);
        let dead = broker.dead_letters().await;
        assert_eq!(dead[0].routing_key, "saga.x.y.z");
        assert_eq!(dead[0].body, "bad");
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn close_stops_publishing() {
        let broker = InMemoryBroker::new();
        broker.close().await.unwrap();

        let result = broker.publish("saga.x.y.z", message("{}")).await;
        assert!(matches!(result, Err(MessagingError::Closed)));
    }

    #[tokio::test]
    async fn publish_log_counts_by_routing_key() {
        let broker = InMemoryBroker::new();
        broker.publish("saga.a.b.c", message("{}")).await.unwrap();
        broker.publish("saga.a.b.c", message("{}")).await.unwrap();
        broker.publish("saga.d.e.f", message("{}")).await.unwrap();

        assert_eq!(broker.published_count("saga.a.b.c").await, 2);
        assert_eq!(broker.published_count("saga.d.e.f").await, 1);
        assert_eq!(broker.published_count("saga.zzz").await, 0);
    }
}
