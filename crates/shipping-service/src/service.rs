//! Command handlers for `shipping.create` and `shipping.cancel`.

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::{Shipment, ShipmentStatus};

use messaging::payloads::{
    OperationFailedPayload, ShippingCancelCommand, ShippingCancelledPayload,
    ShippingCreateCommand, ShippingCreatedPayload, ShippingFailedPayload,
};
use messaging::{
    EventHandler, EventType, HandlerError, Publisher, SagaEvent, service as services,
};

use crate::error::{Result, ShippingServiceError};
use crate::store::ShipmentStore;

/// The shipping participant.
pub struct ShippingService<S: ShipmentStore> {
    store: S,
    publisher: Publisher,
    failure_rate: f64,
}

impl<S: ShipmentStore> ShippingService<S> {
    /// Durable queue this participant consumes from.
    pub const QUEUE: &'static str = "shipping-service-queue";

    /// Creates the service with an explicit simulated failure rate.
    pub fn new(store: S, publisher: Publisher, failure_rate: f64) -> Self {
        Self {
            store,
            publisher,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Creates the service reading `SHIPPING_FAILURE_RATE` (default `0.05`).
    pub fn from_env(store: S, publisher: Publisher) -> Self {
        let rate = std::env::var("SHIPPING_FAILURE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.05);
        Self::new(store, publisher, rate)
    }

    /// Routing keys this participant binds: its two commands.
    pub fn routing_patterns() -> Vec<String> {
        vec![
            format!("saga.{}.shipping.create", services::ORCHESTRATOR),
            format!("saga.{}.shipping.cancel", services::ORCHESTRATOR),
        ]
    }

    /// Handles `shipping.create`.
    ///
    /// The simulated provider failure is rolled before anything is persisted,
    /// so a failed creation leaves no shipment row behind.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn create_shipment(
        &self,
        saga_id: SagaId,
        command: ShippingCreateCommand,
    ) -> Result<()> {
        // Duplicate create collides on the per-order uniqueness; replay the
        // persisted outcome instead of creating a second shipment.
        if let Some(existing) = self.store.get_by_order(command.order_id).await? {
            return self.replay_outcome(existing).await;
        }

        if rand::random::<f64>() < self.failure_rate {
            return self
                .publish_failed(saga_id, command.order_id, "Shipping provider unavailable")
                .await;
        }

        let shipment = Shipment::new(
            command.order_id,
            command.customer_id,
            saga_id,
            command.address,
        );
        match self.store.insert(&shipment).await {
            Ok(()) => {}
            Err(ShippingServiceError::DuplicateOrder(_)) => {
                if let Some(existing) = self.store.get_by_order(command.order_id).await? {
                    return self.replay_outcome(existing).await;
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            shipment_id = %shipment.id,
            order_id = %shipment.order_id,
            tracking_id = %shipment.tracking_id,
            "shipment created"
        );
        self.publish_created(shipment).await
    }

    /// Re-emits the reply matching an already-persisted shipment.
    async fn replay_outcome(&self, shipment: Shipment) -> Result<()> {
        match shipment.status {
            ShipmentStatus::Cancelled => {
                tracing::debug!(shipment_id = %shipment.id, "duplicate command, shipment cancelled");
                self.publish_cancelled(&shipment).await
            }
            _ => {
                tracing::debug!(shipment_id = %shipment.id, "duplicate create, replaying success");
                self.publish_created(shipment).await
            }
        }
    }

    /// Handles `shipping.cancel`: allowed only while the shipment is
    /// `pending` or `preparing`.
    #[tracing::instrument(skip(self, command), fields(saga_id = %saga_id))]
    pub async fn cancel_shipment(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        command: ShippingCancelCommand,
    ) -> Result<()> {
        let shipment = match self.store.get_by_order(order_id).await? {
            Some(shipment) => Some(shipment),
            None => self.store.get_by_saga(saga_id).await?,
        };
        let Some(mut shipment) = shipment else {
            return self
                .publish_cancel_failed(saga_id, order_id, "Shipment not found")
                .await;
        };

        // A cancel replayed against an already-cancelled shipment re-emits
        // the reply without side effect.
        if shipment.status == ShipmentStatus::Cancelled {
            tracing::debug!(shipment_id = %shipment.id, "duplicate cancel, replaying success");
            return self.publish_cancelled(&shipment).await;
        }

        if let Err(e) = shipment.cancel(command.reason.clone()) {
            return self
                .publish_cancel_failed(saga_id, order_id, &e.to_string())
                .await;
        }
        self.store.update(&shipment).await?;
        tracing::info!(
            shipment_id = %shipment.id,
            order_id = %shipment.order_id,
            "shipment cancelled"
        );
        self.publish_cancelled(&shipment).await
    }

    async fn publish_created(&self, shipment: Shipment) -> Result<()> {
        let event = SagaEvent::new(
            services::SHIPPING,
            EventType::ShippingCreated,
            shipment.saga_id,
            shipment.order_id,
            &ShippingCreatedPayload { shipment },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_failed(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!(%saga_id, %order_id, %reason, "shipment creation failed");
        let event = SagaEvent::new(
            services::SHIPPING,
            EventType::ShippingFailed,
            saga_id,
            order_id,
            &ShippingFailedPayload {
                order_id,
                reason: reason.to_string(),
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_cancelled(&self, shipment: &Shipment) -> Result<()> {
        let event = SagaEvent::new(
            services::SHIPPING,
            EventType::ShippingCancelled,
            shipment.saga_id,
            shipment.order_id,
            &ShippingCancelledPayload {
                shipment_id: shipment.id,
                tracking_id: shipment.tracking_id.clone(),
                reason: shipment.failure_reason.clone(),
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_cancel_failed(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!(%saga_id, %order_id, %reason, "shipment cancellation failed");
        let event = SagaEvent::new(
            services::SHIPPING,
            EventType::ShippingCancelFailed,
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
impl<S: ShipmentStore> EventHandler for ShippingService<S> {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError> {
        match event.event_type {
            EventType::ShippingCreate => match event.payload_as::<ShippingCreateCommand>() {
                Ok(command) => self
                    .create_shipment(event.saga_id, command)
                    .await
                    .map_err(Into::into),
                Err(e) => self
                    .publish_failed(
                        event.saga_id,
                        event.order_id,
                        &format!("Invalid shipping request: {e}"),
                    )
                    .await
                    .map_err(Into::into),
            },
            EventType::ShippingCancel => {
                let command = event
                    .payload_as::<ShippingCancelCommand>()
                    .unwrap_or(ShippingCancelCommand {
                        shipment_id: None,
                        reason: "saga compensation".to_string(),
                    });
                self.cancel_shipment(event.saga_id, event.order_id, command)
                    .await
                    .map_err(Into::into)
            }
            other => {
                tracing::debug!(event_type = %other, "ignoring event");
                Ok(())
            }
        }
    }
}
