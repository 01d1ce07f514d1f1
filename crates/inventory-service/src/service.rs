//! Command handlers for `inventory.reserve` and `inventory.release`.

use async_trait::async_trait;
use common::{OrderId, SagaId};

use messaging::payloads::{
    InventoryFailedPayload, InventoryReleaseCommand, InventoryReleasedPayload,
    InventoryReserveCommand, InventoryReservedPayload,
};
use messaging::{
    EventHandler, EventType, HandlerError, Publisher, SagaEvent, service as services,
};

use crate::error::{InventoryServiceError, Result};
use crate::store::InventoryStore;

/// The inventory participant.
pub struct InventoryService<S: InventoryStore> {
    store: S,
    publisher: Publisher,
}

impl<S: InventoryStore> InventoryService<S> {
    /// Durable queue this participant consumes from.
    pub const QUEUE: &'static str = "inventory-service-queue";

    /// Creates the service.
    pub fn new(store: S, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Routing keys this participant binds: its commands plus the terminal
    /// completion event that converts reservations to sales.
    pub fn routing_patterns() -> Vec<String> {
        vec![
            format!("saga.{}.inventory.reserve", services::ORCHESTRATOR),
            format!("saga.{}.inventory.release", services::ORCHESTRATOR),
            format!("saga.{}.order.completed", services::ORCHESTRATOR),
        ]
    }

    /// Handles `inventory.reserve`: all items or none.
    ///
    /// Reservation is keyed by saga: a duplicate command finds the existing
    /// reservations and re-emits `inventory.reserved` without touching stock.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn reserve(&self, saga_id: SagaId, command: InventoryReserveCommand) -> Result<()> {
        let existing = self.store.reservations_by_saga(saga_id).await?;
        if !existing.is_empty() {
            tracing::debug!(%saga_id, "duplicate reserve, replaying existing reservations");
            return self
                .publish_reserved(saga_id, command.order_id, existing)
                .await;
        }

        if command.items.is_empty() {
            return self
                .publish_failed(saga_id, command.order_id, None, "No items to reserve")
                .await;
        }

        match self
            .store
            .reserve_items(command.order_id, saga_id, &command.items)
            .await
        {
            Ok(reservations) => {
                tracing::info!(
                    %saga_id,
                    order_id = %command.order_id,
                    count = reservations.len(),
                    "inventory reserved"
                );
                self.publish_reserved(saga_id, command.order_id, reservations)
                    .await
            }
            Err(InventoryServiceError::InsufficientStock {
                product_id,
                available,
                requested,
            }) => {
                let reason = format!(
                    "Insufficient stock: available={available}, requested={requested}"
                );
                self.publish_failed(saga_id, command.order_id, Some(product_id), &reason)
                    .await
            }
            Err(InventoryServiceError::ProductNotFound(product_id)) => {
                self.publish_failed(
                    saga_id,
                    command.order_id,
                    Some(product_id),
                    "Product not found",
                )
                .await
            }
            Err(InventoryServiceError::ZeroQuantity(product_id)) => {
                self.publish_failed(
                    saga_id,
                    command.order_id,
                    Some(product_id),
                    "Reservation quantity must be positive",
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    /// Handles `inventory.release`: returns still-reserved stock to the
    /// products. Naturally idempotent via the reservation status check.
    #[tracing::instrument(skip(self, _command), fields(order_id = %order_id))]
    pub async fn release(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        _command: InventoryReleaseCommand,
    ) -> Result<()> {
        let released = self.store.release_by_saga(saga_id).await?;
        tracing::info!(%saga_id, %order_id, count = released.len(), "inventory released");

        let event = SagaEvent::new(
            services::INVENTORY,
            EventType::InventoryReleased,
            saga_id,
            order_id,
            &InventoryReleasedPayload {
                order_id,
                reservation_ids: released,
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    /// Converts the saga's reservations to sales once the order completes.
    pub async fn commit_sale(&self, saga_id: SagaId, order_id: OrderId) -> Result<()> {
        let sold = self.store.mark_sold_by_saga(saga_id).await?;
        if !sold.is_empty() {
            tracing::info!(%saga_id, %order_id, count = sold.len(), "reservations sold");
        }
        Ok(())
    }

    async fn publish_reserved(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        reservations: Vec<domain::InventoryReservation>,
    ) -> Result<()> {
        let event = SagaEvent::new(
            services::INVENTORY,
            EventType::InventoryReserved,
            saga_id,
            order_id,
            &InventoryReservedPayload { reservations },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }

    async fn publish_failed(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        product_id: Option<common::ProductId>,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!(%saga_id, %order_id, ?product_id, %reason, "inventory reservation failed");
        let event = SagaEvent::new(
            services::INVENTORY,
            EventType::InventoryFailed,
            saga_id,
            order_id,
            &InventoryFailedPayload {
                order_id,
                product_id,
                reason: reason.to_string(),
            },
        )?;
        self.publisher.publish(event).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: InventoryStore> EventHandler for InventoryService<S> {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError> {
        match event.event_type {
            EventType::InventoryReserve => match event.payload_as::<InventoryReserveCommand>() {
                Ok(command) => self.reserve(event.saga_id, command).await.map_err(Into::into),
                Err(e) => self
                    .publish_failed(
                        event.saga_id,
                        event.order_id,
                        None,
                        &format!("Invalid reserve request: {e}"),
                    )
                    .await
                    .map_err(Into::into),
            },
            EventType::InventoryRelease => {
                let command = event
                    .payload_as::<InventoryReleaseCommand>()
                    .unwrap_or(InventoryReleaseCommand {
                        reservation_ids: Vec::new(),
                        reason: "compensation".to_string(),
                    });
                self.release(event.saga_id, event.order_id, command)
                    .await
                    .map_err(Into::into)
            }
            EventType::OrderCompleted => self
                .commit_sale(event.saga_id, event.order_id)
                .await
                .map_err(Into::into),
            other => {
                tracing::debug!(event_type = %other, "ignoring event");
                Ok(())
            }
        }
    }
}
