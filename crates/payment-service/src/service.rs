//! Command handlers for `payment.process` and `payment.refund`.

use std::time::Duration;

use async_trait::async_trait;
use common::{Money, SagaId};
use domain::{Payment, PaymentStatus};

use messaging::payloads::{
    OperationFailedPayload, PaymentFailedPayload, PaymentProcessCommand, PaymentProcessedPayload,
    PaymentRefundCommand, PaymentRefundedPayload,
};
use messaging::{
    EventHandler, EventType, HandlerError, Publisher, SagaEvent, service as services,
};

use crate::error::{PaymentServiceError, Result};
use crate::gateway::{ChargeRequest, PaymentGateway, RefundRequest};
use crate::store::PaymentStore;

/// Deadline for a single gateway call.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

/// The payment participant.
pub struct PaymentService<S: PaymentStore, G: PaymentGateway> {
    store: S,
    gateway: G,
    publisher: Publisher,
}

impl<S: PaymentStore, G: PaymentGateway> PaymentService<S, G> {
    /// Durable queue this participant consumes from.
    pub const QUEUE: &'static str = "payment-service-queue";

    /// Creates the service.
    pub fn new(store: S, gateway: G, publisher: Publisher) -> Self {
        Self {
            store,
            gateway,
            publisher,
        }
    }

    /// Routing keys this participant binds: its two commands.
    pub fn routing_patterns() -> Vec<String> {
        vec![
            format!("saga.{}.payment.process", services::ORCHESTRATOR),
            format!("saga.{}.payment.refund", services::ORCHESTRATOR),
        ]
    }

    /// Handles `payment.process`: inserts a pending payment, charges the
    /// gateway, and replies `payment.processed` or `payment.failed`.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn process_payment(
        &self,
        saga_id: SagaId,
        command: PaymentProcessCommand,
    ) -> Result<()> {
        if !command.amount.is_positive() {
            return self
                .publish_payment_failed(
                    saga_id,
                    command.order_id,
                    "Invalid payment amount",
                    command.amount,
                )
                .await;
        }

        // At-most-one payment per order: a duplicate command collides on the
        // unique constraint and replays the persisted outcome instead.
        if let Some(existing) = self.store.get_by_order(command.order_id).await? {
            return self.replay_outcome(existing, &command).await;
        }

        let payment = Payment::new(
            command.order_id,
            command.customer_id,
            saga_id,
            command.amount,
            command.payment_method.clone(),
        );
        match self.store.insert(&payment).await {
            Ok(()) => {}
            Err(PaymentServiceError::DuplicateOrder(_)) => {
                // Lost the race to a concurrent duplicate.
                if let Some(existing) = self.store.get_by_order(command.order_id).await? {
                    return self.replay_outcome(existing, &command).await;
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.charge(payment, &command).await
    }

    /// Re-emits the terminal event matching an already-persisted payment.
    async fn replay_outcome(
        &self,
        payment: Payment,
        command: &PaymentProcessCommand,
    ) -> Result<()> {
        match payment.status {
            PaymentStatus::Completed | PaymentStatus::Refunded => {
                tracing::debug!(payment_id = %payment.id, "duplicate process, replaying success");
                self.publish_payment_processed(payment).await
            }
            PaymentStatus::Failed => {
                let reason = payment
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "payment failed".to_string());
                tracing::debug!(payment_id = %payment.id, "duplicate process, replaying failure");
                self.publish_payment_failed(
                    payment.saga_id,
                    payment.order_id,
                    &reason,
                    payment.amount,
                )
                .await
            }
            PaymentStatus::Pending => {
                // The previous attempt never heard back from the gateway;
                // finish the charge on the existing row.
                tracing::info!(payment_id = %payment.id, "resuming pending payment");
                self.charge(payment, command).await
            }
        }
    }

    /// Calls the gateway and finalizes the payment row either way.
    async fn charge(&self, mut payment: Payment, command: &PaymentProcessCommand) -> Result<()> {
        let request = ChargeRequest {
            order_id: command.order_id,
            customer_id: command.customer_id,
            amount: command.amount,
            currency: "USD".to_string(),
            payment_method: command.payment_method.clone(),
            description: format!("Order payment for {}", command.order_id),
        };

        let response =
            match tokio::time::timeout(GATEWAY_TIMEOUT, self.gateway.process_payment(request))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let reason = format!("Payment gateway error: {e}");
                    payment.mark_failed(&reason);
                    self.store.update(&payment).await?;
                    return self
                        .publish_payment_failed(
                            payment.saga_id,
                            payment.order_id,
                            &reason,
                            payment.amount,
                        )
                        .await;
                }
                Err(_) => {
                    let reason = "Payment gateway timed out".to_string();
                    payment.mark_failed(&reason);
                    self.store.update(&payment).await?;
                    return self
                        .publish_payment_failed(
                            payment.saga_id,
                            payment.order_id,
                            &reason,
                            payment.amount,
                        )
                        .await;
                }
            };

        if !response.success {
            let reason = response
                .failure_reason
                .unwrap_or_else(|| "payment declined".to_string());
            payment.mark_failed(&reason);
            self.store.update(&payment).await?;
            return self
                .publish_payment_failed(payment.saga_id, payment.order_id, &reason, payment.amount)
                .await;
        }

        payment.mark_completed(
            response.transaction_id.unwrap_or_default(),
            response.external_ref.unwrap_or_default(),
        );
        self.store.update(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            amount = %payment.amount,
            "payment completed"
        );
        self.publish_payment_processed(payment).await
    }

    /// Handles `payment.refund`: locates the payment, validates the bounds,
    /// refunds through the gateway, and replies `payment.refunded`.
    #[tracing::instrument(skip(self, command), fields(saga_id = %saga_id))]
    pub async fn refund_payment(
        &self,
        saga_id: SagaId,
        command: PaymentRefundCommand,
    ) -> Result<()> {
        let payment = match command.payment_id {
            Some(id) => self.store.get(id).await?,
            None => self.store.get_by_saga(saga_id).await?,
        };
        let Some(mut payment) = payment else {
            // The order is unknown when the payment cannot be located.
            let order_id = common::OrderId::from_uuid(uuid::Uuid::nil());
            return self
                .publish_refund_failed(saga_id, order_id, "Payment not found")
                .await;
        };

        // A refund replayed against an already-refunded payment re-emits the
        // reply without touching the gateway.
        if payment.status == PaymentStatus::Refunded {
            tracing::debug!(payment_id = %payment.id, "duplicate refund, replaying success");
            return self
                .publish_payment_refunded(&payment, payment.refunded_amount)
                .await;
        }

        if !payment.can_refund() {
            let reason = format!("Payment cannot be refunded, status: {}", payment.status);
            return self
                .publish_refund_failed(saga_id, payment.order_id, &reason)
                .await;
        }

        let remaining = payment.remaining_refund();
        if !command.amount.is_positive() || command.amount > remaining {
            let reason = format!(
                "Invalid refund amount: {}, remaining: {}",
                command.amount, remaining
            );
            return self
                .publish_refund_failed(saga_id, payment.order_id, &reason)
                .await;
        }

        let request = RefundRequest {
            transaction_id: payment.transaction_id.clone().unwrap_or_default(),
            external_ref: payment.external_ref.clone(),
            amount: command.amount,
            reason: command.reason.clone(),
        };
        let response =
            match tokio::time::timeout(GATEWAY_TIMEOUT, self.gateway.refund_payment(request)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return self
                        .publish_refund_failed(
                            saga_id,
                            payment.order_id,
                            &format!("Gateway refund error: {e}"),
                        )
                        .await;
                }
                Err(_) => {
                    return self
                        .publish_refund_failed(
                            saga_id,
                            payment.order_id,
                            "Refund gateway timed out",
                        )
                        .await;
                }
            };

        if !response.success {
            let reason = response
                .failure_reason
                .unwrap_or_else(|| "refund declined".to_string());
            return self
                .publish_refund_failed(saga_id, payment.order_id, &reason)
                .await;
        }

        let reference = response.refund_reference.unwrap_or_default();
        if let Err(e) = payment.refund(reference, command.amount) {
            return self
                .publish_refund_failed(saga_id, payment.order_id, &e.to_string())
                .await;
        }
        self.store.update(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            amount = %command.amount,
            "payment refunded"
        );
        self.publish_payment_refunded(&payment, command.amount).await
    }

    async fn publish_payment_processed(&self, payment: Payment) -> Result<()> {
        let event = SagaEvent::new(
            services::PAYMENT,
            EventType::PaymentProcessed,
            payment.saga_id,
            payment.order_id,
            &PaymentProcessedPayload { payment },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_payment_failed(
        &self,
        saga_id: SagaId,
        order_id: common::OrderId,
        reason: &str,
        amount: Money,
    ) -> Result<()> {
        tracing::warn!(%order_id, %reason, "payment failed");
        let event = SagaEvent::new(
            services::PAYMENT,
            EventType::PaymentFailed,
            saga_id,
            order_id,
            &PaymentFailedPayload {
                order_id,
                reason: reason.to_string(),
                amount,
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_payment_refunded(&self, payment: &Payment, amount: Money) -> Result<()> {
        let event = SagaEvent::new(
            services::PAYMENT,
            EventType::PaymentRefunded,
            payment.saga_id,
            payment.order_id,
            &PaymentRefundedPayload {
                payment_id: payment.id,
                transaction_id: payment.transaction_id.clone(),
                refund_reference: payment.refund_reference.clone(),
                refunded_amount: amount,
                total_refunded: payment.refunded_amount,
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_refund_failed(
        &self,
        saga_id: SagaId,
        order_id: common::OrderId,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!(%saga_id, %order_id, %reason, "refund failed");
        let event = SagaEvent::new(
            services::PAYMENT,
            EventType::PaymentRefundFailed,
            saga_id,
            order_id,
            &OperationFailedPayload {
                reason: reason.to_string(),
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: PaymentStore, G: PaymentGateway> EventHandler for PaymentService<S, G> {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError> {
        match event.event_type {
            EventType::PaymentProcess => match event.payload_as::<PaymentProcessCommand>() {
                Ok(command) => self
                    .process_payment(event.saga_id, command)
                    .await
                    .map_err(Into::into),
                Err(e) => {
                    // Validation failure: reply with a failure event so the
                    // orchestrator compensates; do not retry.
                    self.publish_payment_failed(
                        event.saga_id,
                        event.order_id,
                        &format!("Invalid payment request: {e}"),
                        Money::zero(),
                    )
                    .await
                    .map_err(Into::into)
                }
            },
            EventType::PaymentRefund => match event.payload_as::<PaymentRefundCommand>() {
                Ok(command) => self
                    .refund_payment(event.saga_id, command)
                    .await
                    .map_err(Into::into),
                Err(e) => self
                    .publish_refund_failed(
                        event.saga_id,
                        event.order_id,
                        &format!("Invalid refund request: {e}"),
                    )
                    .await
                    .map_err(Into::into),
            },
            other => {
                tracing::debug!(event_type = %other, "ignoring event");
                Ok(())
            }
        }
    }
}
