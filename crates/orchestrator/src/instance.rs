//! The saga instance: durable per-order state.
//!
//! Every method here is a pure, synchronous state transition. The service
//! layer decides which transitions to apply and owns all I/O.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, SagaId};
use domain::{Order, OrderItem, StatusParseError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::step::{CompensationStep, ForwardStep};

/// Lifecycle of a saga.
///
/// ```text
/// started ──► in_progress ──┬──► completed
///        └──────────────────┴──► compensating ──► compensated
/// ```
///
/// `failed` is reserved for sagas that could never start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    /// Returns the status name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "started",
            SagaStatus::InProgress => "in_progress",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Compensated => "compensated",
        }
    }

    /// Returns true for states that will never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SagaStatus::Started),
            "in_progress" => Ok(SagaStatus::InProgress),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            "compensating" => Ok(SagaStatus::Compensating),
            "compensated" => Ok(SagaStatus::Compensated),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// Step outputs accumulated while the saga runs, used to parameterize later
/// commands and compensations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaContext {
    /// Snapshot of the order as it was when the saga started.
    pub order: Option<Order>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub total_amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub reservation_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    /// Set when the notification step failed; the saga still completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_failure: Option<String>,
}

/// Output extracted from a forward-step success reply.
#[derive(Debug, Clone)]
pub enum StepOutput {
    Payment {
        payment_id: Uuid,
        transaction_id: Option<String>,
    },
    Reservations(Vec<Uuid>),
    Shipment {
        shipment_id: Uuid,
        tracking_id: String,
    },
    None,
}

/// A persistent saga instance. At most one exists per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    pub id: SagaId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub status: SagaStatus,
    /// The latest completed forward step.
    pub current_step: ForwardStep,
    pub completed_steps: Vec<ForwardStep>,
    pub compensated_steps: Vec<CompensationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub context: SagaContext,
    /// Optimistic concurrency token; bumped on every persisted update.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// Creates a saga from an `order.created` snapshot.
    ///
    /// `order_created` is marked completed immediately: the order exists by
    /// the time the start event reaches the orchestrator.
    pub fn start(saga_id: SagaId, order: &Order) -> Self {
        let now = Utc::now();
        Self {
            id: saga_id,
            order_id: order.id,
            customer_id: order.customer_id,
            status: SagaStatus::Started,
            current_step: ForwardStep::OrderCreated,
            completed_steps: vec![ForwardStep::OrderCreated],
            compensated_steps: Vec::new(),
            failure_reason: None,
            context: SagaContext {
                order: Some(order.clone()),
                items: order.items.clone(),
                total_amount: order.total_amount,
                ..SagaContext::default()
            },
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns true if the forward step has already been recorded.
    pub fn is_step_completed(&self, step: ForwardStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Records a completed forward step and advances `current_step`.
    pub fn mark_step_completed(&mut self, step: ForwardStep) {
        if !self.is_step_completed(step) {
            self.completed_steps.push(step);
        }
        self.current_step = step;
        self.updated_at = Utc::now();
    }

    /// Returns the forward step awaiting execution, if any.
    pub fn next_forward_step(&self) -> Option<ForwardStep> {
        self.current_step.next()
    }

    /// Merges a step's output into the saga context.
    pub fn absorb_step_output(&mut self, output: StepOutput) {
        match output {
            StepOutput::Payment {
                payment_id,
                transaction_id,
            } => {
                self.context.payment_id = Some(payment_id);
                self.context.transaction_id = transaction_id;
            }
            StepOutput::Reservations(ids) => {
                self.context.reservation_ids = ids;
            }
            StepOutput::Shipment {
                shipment_id,
                tracking_id,
            } => {
                self.context.shipment_id = Some(shipment_id);
                self.context.tracking_id = Some(tracking_id);
            }
            StepOutput::None => {}
        }
    }

    /// Records a notification failure without failing the saga.
    pub fn record_notification_failure(&mut self, reason: impl Into<String>) {
        self.context.notification_failure = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Moves the saga into compensation after a forward failure.
    pub fn begin_compensation(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.status = SagaStatus::Compensating;
        self.updated_at = Utc::now();
    }

    /// Returns true if the compensation step has already been recorded.
    pub fn is_compensation_completed(&self, step: CompensationStep) -> bool {
        self.compensated_steps.contains(&step)
    }

    /// Records a completed compensation step.
    pub fn mark_compensation_completed(&mut self, step: CompensationStep) {
        if !self.is_compensation_completed(step) {
            self.compensated_steps.push(step);
        }
        self.updated_at = Utc::now();
    }

    /// Selects the next compensation: scan completed forward steps in reverse
    /// and pick the first whose compensation has not been recorded.
    pub fn next_compensation_step(&self) -> Option<CompensationStep> {
        self.completed_steps
            .iter()
            .rev()
            .filter_map(ForwardStep::compensation)
            .find(|comp| !self.is_compensation_completed(*comp))
    }

    /// Finalizes the forward chain.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = SagaStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Finalizes the compensation chain.
    pub fn mark_compensated(&mut self) {
        let now = Utc::now();
        self.status = SagaStatus::Compensated;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Total saga amount, from the order snapshot.
    pub fn total_amount(&self) -> Money {
        self.context.total_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use domain::ShippingAddress;

    fn order() -> Order {
        Order::new(
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
        .unwrap()
    }

    fn started_saga() -> SagaInstance {
        SagaInstance::start(SagaId::new(), &order())
    }

    #[test]
    fn start_seeds_context_and_first_step() {
        let order = order();
        let saga_id = SagaId::new();
        let saga = SagaInstance::start(saga_id, &order);

        assert_eq!(saga.id, saga_id);
        assert_eq!(saga.order_id, order.id);
        assert_eq!(saga.status, SagaStatus::Started);
        assert_eq!(saga.current_step, ForwardStep::OrderCreated);
        assert_eq!(saga.completed_steps, vec![ForwardStep::OrderCreated]);
        assert_eq!(saga.context.total_amount, Money::from_cents(259_998));
        assert_eq!(saga.context.items.len(), 1);
        assert!(saga.context.order.is_some());
        assert_eq!(saga.next_forward_step(), Some(ForwardStep::PaymentProcessed));
    }

    #[test]
    fn forward_chain_advances_step_by_step() {
        let mut saga = started_saga();

        saga.mark_step_completed(ForwardStep::PaymentProcessed);
        assert_eq!(saga.current_step, ForwardStep::PaymentProcessed);
        assert_eq!(saga.next_forward_step(), Some(ForwardStep::InventoryReserved));

        saga.mark_step_completed(ForwardStep::InventoryReserved);
        saga.mark_step_completed(ForwardStep::ShippingCreated);
        saga.mark_step_completed(ForwardStep::NotificationSent);
        assert_eq!(saga.next_forward_step(), None);

        saga.complete();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert!(saga.status.is_terminal());
        assert!(saga.completed_at.is_some());
    }

    #[test]
    fn marking_a_step_twice_records_it_once() {
        let mut saga = started_saga();
        saga.mark_step_completed(ForwardStep::PaymentProcessed);
        saga.mark_step_completed(ForwardStep::PaymentProcessed);

        assert_eq!(
            saga.completed_steps,
            vec![ForwardStep::OrderCreated, ForwardStep::PaymentProcessed]
        );
    }

    #[test]
    fn step_outputs_accumulate_in_context() {
        let mut saga = started_saga();
        let payment_id = Uuid::new_v4();
        let reservation = Uuid::new_v4();
        let shipment_id = Uuid::new_v4();

        saga.absorb_step_output(StepOutput::Payment {
            payment_id,
            transaction_id: Some("TXN_1".to_string()),
        });
        saga.absorb_step_output(StepOutput::Reservations(vec![reservation]));
        saga.absorb_step_output(StepOutput::Shipment {
            shipment_id,
            tracking_id: "TRK_ABC".to_string(),
        });

        assert_eq!(saga.context.payment_id, Some(payment_id));
        assert_eq!(saga.context.transaction_id.as_deref(), Some("TXN_1"));
        assert_eq!(saga.context.reservation_ids, vec![reservation]);
        assert_eq!(saga.context.shipment_id, Some(shipment_id));
        assert_eq!(saga.context.tracking_id.as_deref(), Some("TRK_ABC"));
    }

    #[test]
    fn compensation_runs_in_reverse_of_completed_steps() {
        let mut saga = started_saga();
        saga.mark_step_completed(ForwardStep::PaymentProcessed);
        saga.mark_step_completed(ForwardStep::InventoryReserved);

        // Shipping failed: compensation starts.
        saga.begin_compensation("Shipping provider unavailable");
        assert_eq!(saga.status, SagaStatus::Compensating);
        assert_eq!(
            saga.failure_reason.as_deref(),
            Some("Shipping provider unavailable")
        );

        assert_eq!(
            saga.next_compensation_step(),
            Some(CompensationStep::InventoryReleased)
        );
        saga.mark_compensation_completed(CompensationStep::InventoryReleased);

        assert_eq!(
            saga.next_compensation_step(),
            Some(CompensationStep::PaymentRefunded)
        );
        saga.mark_compensation_completed(CompensationStep::PaymentRefunded);

        assert_eq!(
            saga.next_compensation_step(),
            Some(CompensationStep::OrderCancelled)
        );
        saga.mark_compensation_completed(CompensationStep::OrderCancelled);

        assert_eq!(saga.next_compensation_step(), None);
        saga.mark_compensated();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert!(saga.status.is_terminal());
    }

    #[test]
    fn never_reached_steps_are_skipped_in_compensation() {
        let mut saga = started_saga();
        // Payment failed immediately: only order_created completed.
        saga.begin_compensation("Insufficient funds");

        assert_eq!(
            saga.next_compensation_step(),
            Some(CompensationStep::OrderCancelled)
        );
    }

    #[test]
    fn notification_has_no_compensation() {
        let mut saga = started_saga();
        for step in [
            ForwardStep::PaymentProcessed,
            ForwardStep::InventoryReserved,
            ForwardStep::ShippingCreated,
            ForwardStep::NotificationSent,
        ] {
            saga.mark_step_completed(step);
        }
        saga.begin_compensation("hypothetical");

        // Reverse scan starts at shipping, not notification.
        assert_eq!(
            saga.next_compensation_step(),
            Some(CompensationStep::ShippingCancelled)
        );
    }

    #[test]
    fn notification_failure_is_recorded_not_compensated() {
        let mut saga = started_saga();
        saga.record_notification_failure("Notification provider unavailable");
        saga.complete();

        assert_eq!(saga.status, SagaStatus::Completed);
        assert_eq!(
            saga.context.notification_failure.as_deref(),
            Some("Notification provider unavailable")
        );
        assert!(!saga.is_step_completed(ForwardStep::NotificationSent));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SagaStatus::Started,
            SagaStatus::InProgress,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensating,
            SagaStatus::Compensated,
        ] {
            assert_eq!(status.as_str().parse::<SagaStatus>().unwrap(), status);
        }
    }

    #[test]
    fn serialization_round_trip() {
        let mut saga = started_saga();
        saga.mark_step_completed(ForwardStep::PaymentProcessed);
        saga.absorb_step_output(StepOutput::Payment {
            payment_id: Uuid::new_v4(),
            transaction_id: Some("TXN_9".to_string()),
        });

        let json = serde_json::to_string(&saga).unwrap();
        let back: SagaInstance = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, saga.id);
        assert_eq!(back.completed_steps, saga.completed_steps);
        assert_eq!(back.context.payment_id, saga.context.payment_id);
        assert_eq!(back.status, SagaStatus::Started);
    }
}
