//! The orchestrator service: consumes participant replies, advances or
//! compensates the saga, and emits the next command.
//!
//! Every inbound event is classified into saga start, forward success,
//! forward failure, compensation success, or unknown. State is always
//! persisted before the follow-up command is published, so a publish failure
//! is recovered by broker redelivery: the handler re-runs, observes the
//! already-recorded effect, and re-emits the pending command. Downstream
//! participants are idempotent, which makes publishing the same command twice
//! safe.

use async_trait::async_trait;
use chrono::Utc;

use messaging::payloads::{
    InventoryFailedPayload, InventoryReleaseCommand, InventoryReserveCommand,
    InventoryReservedPayload, NotificationSendCommand, OrderCancelCommand, OrderCancelledPayload,
    OrderCompletedPayload, OrderCreatedPayload, PaymentFailedPayload, PaymentProcessCommand,
    PaymentProcessedPayload, PaymentRefundCommand, ReserveItem, ShippingCancelCommand,
    ShippingCreateCommand, ShippingCreatedPayload, ShippingFailedPayload,
};
use messaging::{
    EventHandler, EventType, HandlerError, Publisher, SagaEvent, service as services,
};

use crate::error::{Result, SagaError};
use crate::instance::{SagaInstance, SagaStatus, StepOutput};
use crate::step::{CompensationStep, ForwardStep};
use crate::store::{SagaEventLogEntry, SagaStore};

/// Message body of the confirmation notification.
const ORDER_CONFIRMATION_MESSAGE: &str = "Your order has been confirmed.";

/// Central saga coordinator.
pub struct Orchestrator<S: SagaStore> {
    store: S,
    publisher: Publisher,
}

impl<S: SagaStore> Orchestrator<S> {
    /// Creates an orchestrator over a saga store and a publisher.
    pub fn new(store: S, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Routing-key patterns the orchestrator queue binds to: everything every
    /// participant publishes.
    pub fn routing_patterns() -> Vec<String> {
        [
            services::ORDER,
            services::PAYMENT,
            services::INVENTORY,
            services::SHIPPING,
            services::NOTIFICATION,
        ]
        .iter()
        .map(|service| format!("saga.{service}.#"))
        .collect()
    }

    /// Classifies and processes one inbound event.
    ///
    /// Events referencing unknown sagas and unrecognized event types are
    /// logged and dropped (acked). Persistence and publish failures are
    /// returned to the consumer, which retries the delivery.
    #[tracing::instrument(
        skip(self, event),
        fields(event_type = %event.event_type, saga_id = %event.saga_id)
    )]
    pub async fn handle_event(&self, event: &SagaEvent) -> Result<()> {
        self.log_event(event).await;

        match &event.event_type {
            EventType::OrderCreated => self.start_saga(event).await,

            EventType::PaymentProcessed => {
                let output = match event.payload_as::<PaymentProcessedPayload>() {
                    Ok(p) => StepOutput::Payment {
                        payment_id: p.payment.id,
                        transaction_id: p.payment.transaction_id,
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "payment.processed payload missing payment");
                        StepOutput::None
                    }
                };
                self.forward_success(event, ForwardStep::PaymentProcessed, output)
                    .await
            }
            EventType::InventoryReserved => {
                let output = match event.payload_as::<InventoryReservedPayload>() {
                    Ok(p) => {
                        StepOutput::Reservations(p.reservations.iter().map(|r| r.id).collect())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "inventory.reserved payload missing reservations");
                        StepOutput::None
                    }
                };
                self.forward_success(event, ForwardStep::InventoryReserved, output)
                    .await
            }
            EventType::ShippingCreated => {
                let output = match event.payload_as::<ShippingCreatedPayload>() {
                    Ok(p) => StepOutput::Shipment {
                        shipment_id: p.shipment.id,
                        tracking_id: p.shipment.tracking_id,
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "shipping.created payload missing shipment");
                        StepOutput::None
                    }
                };
                self.forward_success(event, ForwardStep::ShippingCreated, output)
                    .await
            }
            EventType::NotificationSent => {
                self.forward_success(event, ForwardStep::NotificationSent, StepOutput::None)
                    .await
            }

            EventType::PaymentFailed => {
                let reason = event
                    .payload_as::<PaymentFailedPayload>()
                    .map(|p| p.reason)
                    .unwrap_or_else(|_| extract_reason(event));
                self.forward_failure(event, reason).await
            }
            EventType::InventoryFailed => {
                let reason = event
                    .payload_as::<InventoryFailedPayload>()
                    .map(|p| p.reason)
                    .unwrap_or_else(|_| extract_reason(event));
                self.forward_failure(event, reason).await
            }
            EventType::ShippingFailed => {
                let reason = event
                    .payload_as::<ShippingFailedPayload>()
                    .map(|p| p.reason)
                    .unwrap_or_else(|_| extract_reason(event));
                self.forward_failure(event, reason).await
            }
            EventType::NotificationFailed => {
                self.notification_failed(event, extract_reason(event)).await
            }

            EventType::ShippingCancelled => {
                self.compensation_success(event, CompensationStep::ShippingCancelled)
                    .await
            }
            EventType::InventoryReleased => {
                self.compensation_success(event, CompensationStep::InventoryReleased)
                    .await
            }
            EventType::PaymentRefunded => {
                self.compensation_success(event, CompensationStep::PaymentRefunded)
                    .await
            }

            EventType::PaymentRefundFailed
            | EventType::InventoryReleaseFailed
            | EventType::ShippingCancelFailed => {
                // The saga stays in compensating; operator intervention is
                // required to unstick it.
                tracing::warn!(
                    saga_id = %event.saga_id,
                    event_type = %event.event_type,
                    "compensation step failed, saga requires operator intervention"
                );
                Ok(())
            }

            other => {
                tracing::warn!(event_type = %other, "unrecognized event type, dropping");
                Ok(())
            }
        }
    }

    /// Re-emits the command or terminal event the persisted state is waiting
    /// on. Used for duplicate deliveries (a retry after a publish failure
    /// looks like a duplicate) and by startup recovery.
    async fn redrive(&self, saga: &SagaInstance) -> Result<()> {
        match saga.status {
            SagaStatus::Started | SagaStatus::InProgress => {
                if let Some(next) = saga.next_forward_step() {
                    self.publish(self.command_for_step(saga, next)?).await?;
                }
            }
            SagaStatus::Completed => self.publish_order_completed(saga).await?,
            SagaStatus::Compensating => {
                if let Some(comp) = saga.next_compensation_step() {
                    self.publish(self.command_for_compensation(saga, comp)?)
                        .await?;
                }
            }
            SagaStatus::Compensated => self.publish_order_cancelled(saga).await?,
            SagaStatus::Failed => {}
        }
        Ok(())
    }

    /// Creates the saga from an `order.created` snapshot and issues the first
    /// command. A second start for the same order is a no-op.
    async fn start_saga(&self, event: &SagaEvent) -> Result<()> {
        let payload: OrderCreatedPayload = event
            .payload_as()
            .map_err(|e| SagaError::InvalidStartPayload(e.to_string()))?;

        if let Some(existing) = self.store.get_by_order(payload.order.id).await? {
            tracing::debug!(saga_id = %existing.id, "saga already exists for order");
            if existing.status == SagaStatus::Started {
                self.redrive(&existing).await?;
            }
            return Ok(());
        }

        let saga = SagaInstance::start(event.saga_id, &payload.order);
        match self.store.create(&saga).await {
            Ok(()) => {}
            Err(SagaError::DuplicateSaga(order_id)) => {
                tracing::debug!(%order_id, "lost saga creation race");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(
            saga_id = %saga.id,
            order_id = %saga.order_id,
            total = %saga.total_amount(),
            "saga started"
        );

        self.publish(self.command_for_step(&saga, ForwardStep::PaymentProcessed)?)
            .await
    }

    /// Records a forward step completion and advances or finalizes.
    async fn forward_success(
        &self,
        event: &SagaEvent,
        step: ForwardStep,
        output: StepOutput,
    ) -> Result<()> {
        let Some(mut saga) = self.store.get(event.saga_id).await? else {
            tracing::warn!(saga_id = %event.saga_id, "reply references unknown saga, dropping");
            return Ok(());
        };

        if saga.is_step_completed(step) {
            tracing::debug!(saga_id = %saga.id, %step, "duplicate step reply");
            if step == saga.current_step {
                self.redrive(&saga).await?;
            }
            return Ok(());
        }

        if !matches!(saga.status, SagaStatus::Started | SagaStatus::InProgress) {
            tracing::warn!(
                saga_id = %saga.id,
                status = %saga.status,
                %step,
                "forward reply in non-forward state, dropping"
            );
            return Ok(());
        }

        saga.mark_step_completed(step);
        saga.absorb_step_output(output);

        match saga.next_forward_step() {
            Some(next) => {
                saga.status = SagaStatus::InProgress;
                self.store.update(&mut saga).await?;
                self.publish(self.command_for_step(&saga, next)?).await?;
                tracing::info!(saga_id = %saga.id, completed = %step, next = %next, "saga advanced");
            }
            None => {
                saga.complete();
                self.store.update(&mut saga).await?;
                self.publish_order_completed(&saga).await?;
                self.record_terminal_metrics(&saga, "saga_completed");
                tracing::info!(saga_id = %saga.id, order_id = %saga.order_id, "saga completed");
            }
        }
        Ok(())
    }

    /// Starts the compensation chain after a forward step failed.
    async fn forward_failure(&self, event: &SagaEvent, reason: String) -> Result<()> {
        let Some(mut saga) = self.store.get(event.saga_id).await? else {
            tracing::warn!(saga_id = %event.saga_id, "failure references unknown saga, dropping");
            return Ok(());
        };

        if saga.status == SagaStatus::Compensating || saga.status.is_terminal() {
            tracing::debug!(saga_id = %saga.id, status = %saga.status, "duplicate failure reply");
            self.redrive(&saga).await?;
            return Ok(());
        }

        tracing::warn!(
            saga_id = %saga.id,
            order_id = %saga.order_id,
            %reason,
            "forward step failed, starting compensation"
        );
        saga.begin_compensation(reason);
        self.continue_compensation(&mut saga).await
    }

    /// Completes the saga despite a failed notification. Notifications are
    /// fire-and-log; the failure is recorded in the saga context only.
    async fn notification_failed(&self, event: &SagaEvent, reason: String) -> Result<()> {
        let Some(mut saga) = self.store.get(event.saga_id).await? else {
            tracing::warn!(saga_id = %event.saga_id, "failure references unknown saga, dropping");
            return Ok(());
        };

        if saga.status == SagaStatus::Completed {
            tracing::debug!(saga_id = %saga.id, "duplicate notification failure");
            self.publish_order_completed(&saga).await?;
            return Ok(());
        }
        if !matches!(saga.status, SagaStatus::Started | SagaStatus::InProgress) {
            tracing::warn!(saga_id = %saga.id, status = %saga.status, "stale notification failure");
            return Ok(());
        }

        tracing::warn!(saga_id = %saga.id, %reason, "notification failed, completing saga anyway");
        saga.record_notification_failure(reason);
        saga.complete();
        self.store.update(&mut saga).await?;
        self.publish_order_completed(&saga).await?;
        self.record_terminal_metrics(&saga, "saga_completed");
        Ok(())
    }

    /// Records a compensation step completion and continues the chain.
    async fn compensation_success(&self, event: &SagaEvent, comp: CompensationStep) -> Result<()> {
        let Some(mut saga) = self.store.get(event.saga_id).await? else {
            tracing::warn!(saga_id = %event.saga_id, "compensation references unknown saga, dropping");
            return Ok(());
        };

        if saga.is_compensation_completed(comp) {
            tracing::debug!(saga_id = %saga.id, %comp, "duplicate compensation reply");
            if saga.compensated_steps.last() == Some(&comp) || saga.status.is_terminal() {
                self.redrive(&saga).await?;
            }
            return Ok(());
        }

        if saga.status != SagaStatus::Compensating {
            tracing::warn!(
                saga_id = %saga.id,
                status = %saga.status,
                %comp,
                "compensation reply outside compensation, dropping"
            );
            return Ok(());
        }

        tracing::info!(saga_id = %saga.id, %comp, "compensation step completed");
        saga.mark_compensation_completed(comp);
        self.continue_compensation(&mut saga).await
    }

    /// Emits the next compensation command, or finalizes the saga when the
    /// chain reaches `order_cancelled` — the orchestrator performs that last
    /// step itself and publishes the terminal `order.cancelled`.
    async fn continue_compensation(&self, saga: &mut SagaInstance) -> Result<()> {
        match saga.next_compensation_step() {
            Some(CompensationStep::OrderCancelled) => {
                let command = self.command_for_compensation(saga, CompensationStep::OrderCancelled)?;
                saga.mark_compensation_completed(CompensationStep::OrderCancelled);
                saga.mark_compensated();
                self.store.update(saga).await?;
                self.publish(command).await?;
                self.publish_order_cancelled(saga).await?;
                self.record_terminal_metrics(saga, "saga_compensated");
                tracing::warn!(
                    saga_id = %saga.id,
                    order_id = %saga.order_id,
                    reason = saga.failure_reason.as_deref().unwrap_or("unknown"),
                    "saga compensated"
                );
            }
            Some(comp) => {
                self.store.update(saga).await?;
                self.publish(self.command_for_compensation(saga, comp)?).await?;
                tracing::info!(saga_id = %saga.id, next = %comp, "compensation command sent");
            }
            None => {
                saga.mark_compensated();
                self.store.update(saga).await?;
                self.publish_order_cancelled(saga).await?;
                self.record_terminal_metrics(saga, "saga_compensated");
            }
        }
        Ok(())
    }

    /// On startup, re-emits the command each in-flight saga is waiting on.
    ///
    /// Commands may have been lost before a participant persisted anything,
    /// so recovery re-drives rather than relying solely on broker-held
    /// unacknowledged messages. Participants are idempotent, which makes the
    /// re-emitted duplicates harmless.
    pub async fn resume_incomplete_sagas(&self) -> Result<usize> {
        let sagas = self.store.find_incomplete().await?;
        for saga in &sagas {
            tracing::info!(
                saga_id = %saga.id,
                status = %saga.status,
                current_step = %saga.current_step,
                "resuming in-flight saga"
            );
            self.redrive(saga).await?;
        }
        Ok(sagas.len())
    }

    fn command_for_step(&self, saga: &SagaInstance, step: ForwardStep) -> Result<SagaEvent> {
        let event = match step {
            ForwardStep::PaymentProcessed => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::PaymentProcess,
                saga.id,
                saga.order_id,
                &PaymentProcessCommand {
                    order_id: saga.order_id,
                    customer_id: saga.customer_id,
                    amount: saga.total_amount(),
                    payment_method: "credit_card".to_string(),
                },
            )?,
            ForwardStep::InventoryReserved => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::InventoryReserve,
                saga.id,
                saga.order_id,
                &InventoryReserveCommand {
                    order_id: saga.order_id,
                    items: saga
                        .context
                        .items
                        .iter()
                        .map(|item| ReserveItem {
                            product_id: item.product_id,
                            quantity: item.quantity,
                        })
                        .collect(),
                },
            )?,
            ForwardStep::ShippingCreated => {
                let order = saga.context.order.as_ref().ok_or_else(|| {
                    SagaError::CommandUnavailable {
                        saga_id: saga.id,
                        reason: "context is missing the order snapshot".to_string(),
                    }
                })?;
                SagaEvent::new(
                    services::ORCHESTRATOR,
                    EventType::ShippingCreate,
                    saga.id,
                    saga.order_id,
                    &ShippingCreateCommand {
                        order_id: saga.order_id,
                        customer_id: saga.customer_id,
                        items: saga.context.items.clone(),
                        address: order.shipping_address.clone(),
                    },
                )?
            }
            ForwardStep::NotificationSent => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::NotificationSend,
                saga.id,
                saga.order_id,
                &NotificationSendCommand {
                    order_id: saga.order_id,
                    customer_id: saga.customer_id,
                    kind: domain::NotificationType::Email,
                    message: ORDER_CONFIRMATION_MESSAGE.to_string(),
                },
            )?,
            ForwardStep::OrderCreated => {
                return Err(SagaError::CommandUnavailable {
                    saga_id: saga.id,
                    reason: "order_created is initiated by the order service".to_string(),
                });
            }
        };
        Ok(event)
    }

    fn command_for_compensation(
        &self,
        saga: &SagaInstance,
        comp: CompensationStep,
    ) -> Result<SagaEvent> {
        let reason = saga
            .failure_reason
            .clone()
            .unwrap_or_else(|| "saga compensation".to_string());

        let event = match comp {
            CompensationStep::ShippingCancelled => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::ShippingCancel,
                saga.id,
                saga.order_id,
                &ShippingCancelCommand {
                    shipment_id: saga.context.shipment_id,
                    reason,
                },
            )?,
            CompensationStep::InventoryReleased => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::InventoryRelease,
                saga.id,
                saga.order_id,
                &InventoryReleaseCommand {
                    reservation_ids: saga.context.reservation_ids.clone(),
                    reason,
                },
            )?,
            CompensationStep::PaymentRefunded => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::PaymentRefund,
                saga.id,
                saga.order_id,
                &PaymentRefundCommand {
                    payment_id: saga.context.payment_id,
                    transaction_id: saga.context.transaction_id.clone(),
                    amount: saga.total_amount(),
                    reason,
                },
            )?,
            CompensationStep::OrderCancelled => SagaEvent::new(
                services::ORCHESTRATOR,
                EventType::OrderCancel,
                saga.id,
                saga.order_id,
                &OrderCancelCommand {
                    order_id: saga.order_id,
                    reason,
                },
            )?,
        };
        Ok(event)
    }

    async fn publish_order_completed(&self, saga: &SagaInstance) -> Result<()> {
        let event = SagaEvent::new(
            services::ORCHESTRATOR,
            EventType::OrderCompleted,
            saga.id,
            saga.order_id,
            &OrderCompletedPayload {
                order_id: saga.order_id,
                status: "completed".to_string(),
            },
        )?;
        self.publish(event).await
    }

    async fn publish_order_cancelled(&self, saga: &SagaInstance) -> Result<()> {
        let event = SagaEvent::new(
            services::ORCHESTRATOR,
            EventType::OrderCancelled,
            saga.id,
            saga.order_id,
            &OrderCancelledPayload {
                order_id: saga.order_id,
                reason: saga.failure_reason.clone(),
            },
        )?;
        self.publish(event).await
    }

    async fn publish(&self, event: SagaEvent) -> Result<()> {
        self.log_event(&event).await;
        self.publisher.publish(event).await?;
        Ok(())
    }

    /// Appends to the audit log; a logging failure never blocks the saga.
    async fn log_event(&self, event: &SagaEvent) {
        let entry = SagaEventLogEntry {
            id: event.id,
            saga_id: event.saga_id,
            event_type: event.event_type.as_str().to_string(),
            event_data: event.payload.clone(),
            service_name: event.service.clone(),
            timestamp: event.timestamp,
            correlation_id: event.correlation_id,
        };
        if let Err(e) = self.store.append_event_log(&entry).await {
            tracing::warn!(saga_id = %event.saga_id, error = %e, "audit log append failed");
        }
    }

    fn record_terminal_metrics(&self, saga: &SagaInstance, counter: &'static str) {
        metrics::counter!(counter).increment(1);
        let duration = (Utc::now() - saga.created_at).num_milliseconds() as f64 / 1000.0;
        metrics::histogram!("saga_duration_seconds").record(duration);
    }
}

/// Pulls a failure reason out of an arbitrary payload mapping.
fn extract_reason(event: &SagaEvent) -> String {
    event
        .payload
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl<S: SagaStore> EventHandler for Orchestrator<S> {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError> {
        self.handle_event(&event).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySagaStore;
    use common::{CustomerId, Money, OrderId, ProductId, SagaId};
    use domain::{
        InventoryReservation, Notification, NotificationType, Order, OrderItem, Payment, Shipment,
        ShippingAddress,
    };
    use messaging::InMemoryBroker;
    use messaging::payloads::{
        InventoryReservedPayload, NotificationSentPayload, PaymentProcessedPayload,
        PaymentRefundedPayload, ShippingCreatedPayload,
    };
    use std::sync::Arc;

    const CMD_PAYMENT: &str = "saga.saga-orchestrator.payment.process";
    const CMD_RESERVE: &str = "saga.saga-orchestrator.inventory.reserve";
    const CMD_SHIPPING: &str = "saga.saga-orchestrator.shipping.create";
    const CMD_NOTIFY: &str = "saga.saga-orchestrator.notification.send";
    const CMD_REFUND: &str = "saga.saga-orchestrator.payment.refund";
    const CMD_RELEASE: &str = "saga.saga-orchestrator.inventory.release";
    const CMD_CANCEL_SHIPPING: &str = "saga.saga-orchestrator.shipping.cancel";
    const CMD_CANCEL_ORDER: &str = "saga.saga-orchestrator.order.cancel";
    const TERMINAL_COMPLETED: &str = "saga.saga-orchestrator.order.completed";
    const TERMINAL_CANCELLED: &str = "saga.saga-orchestrator.order.cancelled";

    fn order() -> Order {
        let mut order = Order::new(
            CustomerId::new(),
            vec![OrderItem::new(
                ProductId::new(),
                2,
                Money::from_cents(129_999),
            )],
            ShippingAddress {
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                zip_code: "62701".to_string(),
                country: "US".to_string(),
            },
        )
        .unwrap();
        order.attach_saga(SagaId::new());
        order.set_status(domain::OrderStatus::Processing);
        order
    }

    fn setup() -> (
        Orchestrator<InMemorySagaStore>,
        InMemorySagaStore,
        Arc<InMemoryBroker>,
    ) {
        let broker = Arc::new(InMemoryBroker::new());
        let store = InMemorySagaStore::new();
        let orchestrator = Orchestrator::new(store.clone(), Publisher::new(broker.clone()));
        (orchestrator, store, broker)
    }

    fn start_event(saga_id: SagaId, order: &Order) -> SagaEvent {
        SagaEvent::new(
            services::ORDER,
            EventType::OrderCreated,
            saga_id,
            order.id,
            &OrderCreatedPayload {
                order: order.clone(),
            },
        )
        .unwrap()
    }

    fn payment_processed(saga_id: SagaId, order: &Order) -> SagaEvent {
        let mut payment = Payment::new(
            order.id,
            order.customer_id,
            saga_id,
            order.total_amount,
            "credit_card",
        );
        payment.mark_completed("TXN_1", "REF_1");
        SagaEvent::new(
            services::PAYMENT,
            EventType::PaymentProcessed,
            saga_id,
            order.id,
            &PaymentProcessedPayload { payment },
        )
        .unwrap()
    }

    fn inventory_reserved(saga_id: SagaId, order: &Order) -> SagaEvent {
        let reservations: Vec<InventoryReservation> = order
            .items
            .iter()
            .map(|item| InventoryReservation::new(order.id, item.product_id, saga_id, item.quantity))
            .collect();
        SagaEvent::new(
            services::INVENTORY,
            EventType::InventoryReserved,
            saga_id,
            order.id,
            &InventoryReservedPayload { reservations },
        )
        .unwrap()
    }

    fn shipping_created(saga_id: SagaId, order: &Order) -> SagaEvent {
        let shipment = Shipment::new(
            order.id,
            order.customer_id,
            saga_id,
            order.shipping_address.clone(),
        );
        SagaEvent::new(
            services::SHIPPING,
            EventType::ShippingCreated,
            saga_id,
            order.id,
            &ShippingCreatedPayload { shipment },
        )
        .unwrap()
    }

    fn notification_sent(saga_id: SagaId, order: &Order) -> SagaEvent {
        let mut notification = Notification::new(
            order.id,
            order.customer_id,
            saga_id,
            NotificationType::Email,
            "Order update",
            "Your order has been confirmed.",
            "customer@example.com",
        );
        notification.mark_sent();
        SagaEvent::new(
            services::NOTIFICATION,
            EventType::NotificationSent,
            saga_id,
            order.id,
            &NotificationSentPayload { notification },
        )
        .unwrap()
    }

    fn failure(service: &str, event_type: EventType, saga_id: SagaId, order: &Order, reason: &str) -> SagaEvent {
        SagaEvent::new(
            service,
            event_type,
            saga_id,
            order.id,
            &serde_json::json!({"order_id": order.id, "reason": reason}),
        )
        .unwrap()
    }

    fn refunded(saga_id: SagaId, order: &Order) -> SagaEvent {
        SagaEvent::new(
            services::PAYMENT,
            EventType::PaymentRefunded,
            saga_id,
            order.id,
            &PaymentRefundedPayload {
                payment_id: uuid::Uuid::new_v4(),
                transaction_id: Some("TXN_1".to_string()),
                refund_reference: Some("RREF_1".to_string()),
                refunded_amount: order.total_amount,
                total_refunded: order.total_amount,
            },
        )
        .unwrap()
    }

    fn released(saga_id: SagaId, order: &Order) -> SagaEvent {
        SagaEvent::new(
            services::INVENTORY,
            EventType::InventoryReleased,
            saga_id,
            order.id,
            &serde_json::json!({"order_id": order.id, "reservation_ids": []}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn order_created_starts_saga_and_requests_payment() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator
            .handle_event(&start_event(saga_id, &order))
            .await
            .unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Started);
        assert_eq!(saga.current_step, ForwardStep::OrderCreated);
        assert_eq!(saga.order_id, order.id);
        assert_eq!(broker.published_count(CMD_PAYMENT).await, 1);
    }

    #[tokio::test]
    async fn duplicate_order_created_does_not_create_second_saga() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        let event = start_event(saga_id, &order);
        orchestrator.handle_event(&event).await.unwrap();
        orchestrator.handle_event(&event).await.unwrap();

        assert_eq!(store.saga_count().await, 1);
        // The second start re-drives the pending command.
        assert_eq!(broker.published_count(CMD_PAYMENT).await, 2);
    }

    #[tokio::test]
    async fn happy_path_runs_the_full_forward_chain() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&inventory_reserved(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&shipping_created(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&notification_sent(saga_id, &order)).await.unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert_eq!(saga.completed_steps.len(), 5);
        assert!(saga.completed_at.is_some());
        assert!(saga.context.payment_id.is_some());
        assert_eq!(saga.context.transaction_id.as_deref(), Some("TXN_1"));
        assert_eq!(saga.context.reservation_ids.len(), 1);
        assert!(saga.context.shipment_id.is_some());
        assert!(saga.context.tracking_id.is_some());

        assert_eq!(broker.published_count(CMD_PAYMENT).await, 1);
        assert_eq!(broker.published_count(CMD_RESERVE).await, 1);
        assert_eq!(broker.published_count(CMD_SHIPPING).await, 1);
        assert_eq!(broker.published_count(CMD_NOTIFY).await, 1);
        assert_eq!(broker.published_count(TERMINAL_COMPLETED).await, 1);
    }

    #[tokio::test]
    async fn payment_failure_compensates_straight_to_order_cancelled() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator
            .handle_event(&failure(
                services::PAYMENT,
                EventType::PaymentFailed,
                saga_id,
                &order,
                "Insufficient funds",
            ))
            .await
            .unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(saga.failure_reason.as_deref(), Some("Insufficient funds"));
        assert_eq!(saga.compensated_steps, vec![CompensationStep::OrderCancelled]);

        // No participant compensation was needed; nothing else was reached.
        assert_eq!(broker.published_count(CMD_REFUND).await, 0);
        assert_eq!(broker.published_count(CMD_RELEASE).await, 0);
        assert_eq!(broker.published_count(CMD_CANCEL_SHIPPING).await, 0);
        assert_eq!(broker.published_count(CMD_CANCEL_ORDER).await, 1);
        assert_eq!(broker.published_count(TERMINAL_CANCELLED).await, 1);
    }

    #[tokio::test]
    async fn inventory_failure_refunds_payment_then_cancels() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        orchestrator
            .handle_event(&failure(
                services::INVENTORY,
                EventType::InventoryFailed,
                saga_id,
                &order,
                "Insufficient stock",
            ))
            .await
            .unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensating);
        assert_eq!(broker.published_count(CMD_REFUND).await, 1);

        orchestrator.handle_event(&refunded(saga_id, &order)).await.unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(
            saga.compensated_steps,
            vec![
                CompensationStep::PaymentRefunded,
                CompensationStep::OrderCancelled
            ]
        );
        assert_eq!(broker.published_count(TERMINAL_CANCELLED).await, 1);
    }

    #[tokio::test]
    async fn shipping_failure_compensates_in_reverse_order() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&inventory_reserved(saga_id, &order)).await.unwrap();
        orchestrator
            .handle_event(&failure(
                services::SHIPPING,
                EventType::ShippingFailed,
                saga_id,
                &order,
                "Shipping provider unavailable",
            ))
            .await
            .unwrap();

        // Inventory is released first (reverse of completion order).
        assert_eq!(broker.published_count(CMD_RELEASE).await, 1);
        assert_eq!(broker.published_count(CMD_REFUND).await, 0);

        orchestrator.handle_event(&released(saga_id, &order)).await.unwrap();
        assert_eq!(broker.published_count(CMD_REFUND).await, 1);

        orchestrator.handle_event(&refunded(saga_id, &order)).await.unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(
            saga.compensated_steps,
            vec![
                CompensationStep::InventoryReleased,
                CompensationStep::PaymentRefunded,
                CompensationStep::OrderCancelled
            ]
        );
        // Shipping never completed, so it is never cancelled.
        assert_eq!(broker.published_count(CMD_CANCEL_SHIPPING).await, 0);
    }

    #[tokio::test]
    async fn notification_failure_still_completes_the_saga() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&inventory_reserved(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&shipping_created(saga_id, &order)).await.unwrap();
        orchestrator
            .handle_event(&failure(
                services::NOTIFICATION,
                EventType::NotificationFailed,
                saga_id,
                &order,
                "Notification provider unavailable",
            ))
            .await
            .unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert!(!saga.is_step_completed(ForwardStep::NotificationSent));
        assert_eq!(
            saga.context.notification_failure.as_deref(),
            Some("Notification provider unavailable")
        );
        assert_eq!(broker.published_count(TERMINAL_COMPLETED).await, 1);
        assert_eq!(broker.published_count(TERMINAL_CANCELLED).await, 0);
    }

    #[tokio::test]
    async fn duplicate_reply_advances_the_saga_exactly_once() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        let reply = payment_processed(saga_id, &order);
        orchestrator.handle_event(&reply).await.unwrap();
        orchestrator.handle_event(&reply).await.unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::InProgress);
        assert_eq!(saga.current_step, ForwardStep::PaymentProcessed);
        assert_eq!(
            saga.completed_steps,
            vec![ForwardStep::OrderCreated, ForwardStep::PaymentProcessed]
        );
        // The pending command is re-driven; the inventory participant treats
        // the second copy as a no-op.
        assert_eq!(broker.published_count(CMD_RESERVE).await, 2);
    }

    #[tokio::test]
    async fn stale_duplicate_is_a_pure_no_op() {
        let (orchestrator, store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        let old_reply = payment_processed(saga_id, &order);
        orchestrator.handle_event(&old_reply).await.unwrap();
        orchestrator.handle_event(&inventory_reserved(saga_id, &order)).await.unwrap();

        // The payment reply is now two steps old: replaying it emits nothing.
        let reserve_count = broker.published_count(CMD_RESERVE).await;
        orchestrator.handle_event(&old_reply).await.unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.current_step, ForwardStep::InventoryReserved);
        assert_eq!(broker.published_count(CMD_RESERVE).await, reserve_count);
    }

    #[tokio::test]
    async fn reply_for_unknown_saga_is_dropped() {
        let (orchestrator, store, broker) = setup();
        let order = order();

        orchestrator
            .handle_event(&payment_processed(SagaId::new(), &order))
            .await
            .unwrap();

        assert_eq!(store.saga_count().await, 0);
        assert_eq!(broker.published_count(CMD_RESERVE).await, 0);
    }

    #[tokio::test]
    async fn unrecognized_event_type_is_dropped() {
        let (orchestrator, _store, _broker) = setup();
        let order = order();

        let event = SagaEvent::new(
            "warehouse-service",
            EventType::Other("warehouse.audit".to_string()),
            SagaId::new(),
            order.id,
            &serde_json::json!({}),
        )
        .unwrap();

        orchestrator.handle_event(&event).await.unwrap();
    }

    #[tokio::test]
    async fn recovery_reemits_the_awaited_command() {
        let (orchestrator, _store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        assert_eq!(broker.published_count(CMD_RESERVE).await, 1);

        // Simulated restart: scan in-flight sagas and re-drive them.
        let resumed = orchestrator.resume_incomplete_sagas().await.unwrap();
        assert_eq!(resumed, 1);
        assert_eq!(broker.published_count(CMD_RESERVE).await, 2);
    }

    #[tokio::test]
    async fn recovery_skips_terminal_sagas() {
        let (orchestrator, _store, broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&inventory_reserved(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&shipping_created(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&notification_sent(saga_id, &order)).await.unwrap();

        let resumed = orchestrator.resume_incomplete_sagas().await.unwrap();
        assert_eq!(resumed, 0);
        assert_eq!(broker.published_count(TERMINAL_COMPLETED).await, 1);
    }

    #[tokio::test]
    async fn compensation_failure_leaves_saga_compensating() {
        let (orchestrator, store, _broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();
        orchestrator.handle_event(&payment_processed(saga_id, &order)).await.unwrap();
        orchestrator
            .handle_event(&failure(
                services::INVENTORY,
                EventType::InventoryFailed,
                saga_id,
                &order,
                "Insufficient stock",
            ))
            .await
            .unwrap();

        // The refund could not be applied; the saga stays stuck for an
        // operator.
        orchestrator
            .handle_event(&failure(
                services::PAYMENT,
                EventType::PaymentRefundFailed,
                saga_id,
                &order,
                "Refund not allowed for this transaction",
            ))
            .await
            .unwrap();

        let saga = store.get(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensating);
    }

    #[tokio::test]
    async fn audit_log_records_inbound_and_outbound_events() {
        let (orchestrator, store, _broker) = setup();
        let order = order();
        let saga_id = order.saga_id.unwrap();

        orchestrator.handle_event(&start_event(saga_id, &order)).await.unwrap();

        // order.created inbound plus payment.process outbound.
        assert_eq!(store.event_log_count().await, 2);
    }
}
