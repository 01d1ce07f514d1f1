//! Command handler for `notification.send`.

use async_trait::async_trait;
use common::SagaId;
use domain::{Notification, NotificationStatus};

use messaging::payloads::{
    NotificationFailedPayload, NotificationSendCommand, NotificationSentPayload,
};
use messaging::{
    EventHandler, EventType, HandlerError, Publisher, SagaEvent, service as services,
};

use crate::error::Result;
use crate::store::NotificationStore;

/// The notification participant.
pub struct NotificationService<S: NotificationStore> {
    store: S,
    publisher: Publisher,
    failure_rate: f64,
}

impl<S: NotificationStore> NotificationService<S> {
    /// Durable queue this participant consumes from.
    pub const QUEUE: &'static str = "notification-service-queue";

    /// Creates the service with an explicit simulated failure rate.
    pub fn new(store: S, publisher: Publisher, failure_rate: f64) -> Self {
        Self {
            store,
            publisher,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Creates the service reading `NOTIFICATION_FAILURE_RATE`
    /// (default `0.02`).
    pub fn from_env(store: S, publisher: Publisher) -> Self {
        let rate = std::env::var("NOTIFICATION_FAILURE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.02);
        Self::new(store, publisher, rate)
    }

    /// Routing keys this participant binds.
    pub fn routing_patterns() -> Vec<String> {
        vec![format!("saga.{}.notification.send", services::ORCHESTRATOR)]
    }

    /// Handles `notification.send`: inserts a pending row, attempts delivery,
    /// and replies `notification.sent` or `notification.failed`.
    ///
    /// A duplicate send for the same saga replays the persisted outcome
    /// without delivering the notification again.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn send(&self, saga_id: SagaId, command: NotificationSendCommand) -> Result<()> {
        if let Some(existing) = self.store.get_by_saga(saga_id).await? {
            tracing::debug!(notification_id = %existing.id, "duplicate send, replaying outcome");
            return match existing.status {
                NotificationStatus::Failed => {
                    self.publish_failed(&existing, "Notification provider unavailable")
                        .await
                }
                _ => self.publish_sent(existing).await,
            };
        }

        let mut notification = Notification::new(
            command.order_id,
            command.customer_id,
            saga_id,
            command.kind,
            "Order update",
            command.message.clone(),
            format!("customer-{}@example.com", command.customer_id),
        );
        self.store.insert(&notification).await?;

        if rand::random::<f64>() < self.failure_rate {
            notification.mark_failed();
            self.store.update(&notification).await?;
            return self
                .publish_failed(&notification, "Notification provider unavailable")
                .await;
        }

        notification.mark_sent();
        self.store.update(&notification).await?;
        tracing::info!(
            notification_id = %notification.id,
            order_id = %notification.order_id,
            kind = %notification.kind,
            recipient = %notification.recipient,
            "notification sent"
        );
        self.publish_sent(notification).await
    }

    async fn publish_sent(&self, notification: Notification) -> Result<()> {
        let event = SagaEvent::new(
            services::NOTIFICATION,
            EventType::NotificationSent,
            notification.saga_id,
            notification.order_id,
            &NotificationSentPayload { notification },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_failed(&self, notification: &Notification, reason: &str) -> Result<()> {
        tracing::warn!(
            notification_id = %notification.id,
            order_id = %notification.order_id,
            %reason,
            "notification failed"
        );
        let event = SagaEvent::new(
            services::NOTIFICATION,
            EventType::NotificationFailed,
            notification.saga_id,
            notification.order_id,
            &NotificationFailedPayload {
                order_id: notification.order_id,
                reason: reason.to_string(),
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: NotificationStore> EventHandler for NotificationService<S> {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError> {
        match event.event_type {
            EventType::NotificationSend => match event.payload_as::<NotificationSendCommand>() {
                Ok(command) => self.send(event.saga_id, command).await.map_err(Into::into),
                Err(e) => {
                    // Malformed send request: report the failure; the
                    // orchestrator records it and completes the saga anyway.
                    tracing::warn!(error = %e, "invalid notification request");
                    let failed = match SagaEvent::new(
                        services::NOTIFICATION,
                        EventType::NotificationFailed,
                        event.saga_id,
                        event.order_id,
                        &NotificationFailedPayload {
                            order_id: event.order_id,
                            reason: format!("Invalid notification request: {e}"),
                        },
                    ) {
                        Ok(failed) => failed,
                        Err(e) => return Err(e.into()),
                    };
                    self.publisher.publish(failed).await.map_err(Into::into)
                }
            },
            other => {
                tracing::debug!(event_type = %other, "ignoring event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNotificationStore;
    use common::{CustomerId, OrderId};
    use domain::NotificationType;
    use messaging::InMemoryBroker;
    use std::sync::Arc;

    const SENT: &str = "saga.notification-service.notification.sent";
    const FAILED: &str = "saga.notification-service.notification.failed";

    fn setup(
        failure_rate: f64,
    ) -> (
        NotificationService<InMemoryNotificationStore>,
        InMemoryNotificationStore,
        Arc<InMemoryBroker>,
    ) {
        let broker = Arc::new(InMemoryBroker::new());
        let store = InMemoryNotificationStore::new();
        let service =
            NotificationService::new(store.clone(), Publisher::new(broker.clone()), failure_rate);
        (service, store, broker)
    }

    fn command(order_id: OrderId) -> NotificationSendCommand {
        NotificationSendCommand {
            order_id,
            customer_id: CustomerId::new(),
            kind: NotificationType::Email,
            message: "Your order has been confirmed.".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_send_marks_sent_and_replies() {
        let (service, store, broker) = setup(0.0);
        let order_id = OrderId::new();

        service.send(SagaId::new(), command(order_id)).await.unwrap();

        let notifications = store.get_by_order(order_id).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].status, NotificationStatus::Sent);
        assert!(notifications[0].sent_at.is_some());
        assert_eq!(broker.published_count(SENT).await, 1);
    }

    #[tokio::test]
    async fn provider_failure_marks_failed_and_replies() {
        let (service, store, broker) = setup(1.0);
        let order_id = OrderId::new();

        service.send(SagaId::new(), command(order_id)).await.unwrap();

        let notifications = store.get_by_order(order_id).await.unwrap();
        assert_eq!(notifications[0].status, NotificationStatus::Failed);
        assert!(notifications[0].sent_at.is_none());
        assert_eq!(broker.published_count(FAILED).await, 1);
        assert_eq!(broker.published_count(SENT).await, 0);
    }

    #[tokio::test]
    async fn duplicate_send_replays_without_second_row() {
        let (service, store, broker) = setup(0.0);
        let saga_id = SagaId::new();
        let order_id = OrderId::new();

        service.send(saga_id, command(order_id)).await.unwrap();
        service.send(saga_id, command(order_id)).await.unwrap();

        assert_eq!(store.notification_count().await, 1);
        assert_eq!(broker.published_count(SENT).await, 2);
    }
}
