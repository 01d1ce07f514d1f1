//! Order creation (saga initiation) and terminal event handling.

use async_trait::async_trait;
use common::{CustomerId, SagaId};
use domain::{Order, OrderItem, OrderStatus, ShippingAddress};

use messaging::payloads::{OrderCancelledPayload, OrderCreatedPayload};
use messaging::{
    EventHandler, EventType, HandlerError, Publisher, SagaEvent, service as services,
};

use crate::error::{OrderServiceError, Result};
use crate::store::OrderStore;

/// An order submission as received from the outer API surface.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
}

/// The order participant.
pub struct OrderService<S: OrderStore> {
    store: S,
    publisher: Publisher,
}

impl<S: OrderStore> OrderService<S> {
    /// Durable queue this participant consumes from.
    pub const QUEUE: &'static str = "order-service-queue";

    /// Creates the service.
    pub fn new(store: S, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Routing keys this participant binds: the orchestrator's terminal
    /// events.
    pub fn routing_patterns() -> Vec<String> {
        vec![
            format!("saga.{}.order.completed", services::ORCHESTRATOR),
            format!("saga.{}.order.cancelled", services::ORCHESTRATOR),
        ]
    }

    /// Creates an order and starts its saga.
    ///
    /// The order is persisted as `pending`, a saga ID is attached, the order
    /// moves to `processing`, and the `order.created` snapshot is published.
    /// When the start event cannot be published the order is marked `failed`
    /// so a stuck `processing` row is never left behind.
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        let mut order = Order::new(
            request.customer_id,
            request.items,
            request.shipping_address,
        )?;
        self.store.insert(&order).await?;
        tracing::info!(
            order_id = %order.id,
            total = %order.total_amount,
            "order created"
        );

        let saga_id = SagaId::new();
        order.attach_saga(saga_id);
        order.set_status(OrderStatus::Processing);
        self.store.update(&order).await?;

        let event = SagaEvent::new(
            services::ORDER,
            EventType::OrderCreated,
            saga_id,
            order.id,
            &OrderCreatedPayload {
                order: order.clone(),
            },
        )?;
        if let Err(e) = self.publisher.publish(event).await {
            tracing::error!(order_id = %order.id, error = %e, "failed to start saga");
            order.set_status(OrderStatus::Failed);
            order.set_failure_reason(format!("Saga start failed: {e}"));
            self.store.update(&order).await?;
            return Err(e.into());
        }

        tracing::info!(order_id = %order.id, %saga_id, "saga start event published");
        Ok(order)
    }

    /// Loads an order.
    pub async fn get_order(&self, order_id: common::OrderId) -> Result<Option<Order>> {
        self.store.get(order_id).await
    }

    /// Finalizes an order from a terminal saga event.
    ///
    /// Terminal transitions are monotonic: a duplicate terminal event finds
    /// the order already finalized and changes nothing.
    pub async fn finalize_order(&self, event: &SagaEvent) -> Result<()> {
        let Some(mut order) = self.store.get(event.order_id).await? else {
            tracing::warn!(order_id = %event.order_id, "terminal event for unknown order");
            return Ok(());
        };

        match event.event_type {
            EventType::OrderCompleted => {
                if order.status == OrderStatus::Completed {
                    return Ok(());
                }
                order.set_status(OrderStatus::Completed);
                tracing::info!(order_id = %order.id, "order completed");
            }
            EventType::OrderCancelled => {
                if order.status == OrderStatus::Cancelled {
                    return Ok(());
                }
                order.set_status(OrderStatus::Cancelled);
                let reason = event
                    .payload_as::<OrderCancelledPayload>()
                    .ok()
                    .and_then(|p| p.reason);
                if let Some(reason) = reason {
                    order.set_failure_reason(reason);
                }
                tracing::warn!(
                    order_id = %order.id,
                    reason = order.failure_reason.as_deref().unwrap_or("unknown"),
                    "order cancelled"
                );
            }
            ref other => {
                tracing::debug!(event_type = %other, "ignoring event");
                return Ok(());
            }
        }

        self.store.update(&order).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: OrderStore> EventHandler for OrderService<S> {
    async fn handle(&self, event: SagaEvent) -> std::result::Result<(), HandlerError> {
        self.finalize_order(&event).await.map_err(Into::into)
    }
}
