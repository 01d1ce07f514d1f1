//! Payments: one per order, refundable only from the completed state.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, SagaId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, StatusParseError};

/// Lifecycle of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A payment record owned by the payment service.
///
/// Invariants: `refunded_amount` never exceeds `amount`, and a `refunded`
/// status implies a positive `refunded_amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub saga_id: SagaId,
    pub amount: Money,
    pub payment_method: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub refunded_amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Creates a pending payment for an order.
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        saga_id: SagaId,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            customer_id,
            saga_id,
            amount,
            payment_method: payment_method.into(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            external_ref: None,
            failure_reason: None,
            refunded_amount: Money::zero(),
            refund_reference: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            refunded_at: None,
        }
    }

    /// Marks the payment as completed with the gateway references.
    pub fn mark_completed(
        &mut self,
        transaction_id: impl Into<String>,
        external_ref: impl Into<String>,
    ) {
        let now = Utc::now();
        self.status = PaymentStatus::Completed;
        self.transaction_id = Some(transaction_id.into());
        self.external_ref = Some(external_ref.into());
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the payment as failed with the reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Applies a refund of `amount`.
    ///
    /// Only completed payments can be refunded, and the amount must be in
    /// `(0, remaining]`. Transitions to `refunded` once fully refunded.
    pub fn refund(
        &mut self,
        refund_reference: impl Into<String>,
        amount: Money,
    ) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Completed {
            return Err(PaymentError::NotRefundable(self.status.to_string()));
        }

        let remaining = self.remaining_refund();
        if !amount.is_positive() || amount > remaining {
            return Err(PaymentError::InvalidRefundAmount {
                requested: amount,
                remaining,
            });
        }

        let now = Utc::now();
        self.refunded_amount += amount;
        self.refund_reference = Some(refund_reference.into());
        self.refunded_at = Some(now);
        self.updated_at = now;
        if self.is_fully_refunded() {
            self.status = PaymentStatus::Refunded;
        }
        Ok(())
    }

    /// Returns true when a refund may be applied.
    pub fn can_refund(&self) -> bool {
        self.status == PaymentStatus::Completed && self.refunded_amount < self.amount
    }

    /// Returns the amount still refundable.
    pub fn remaining_refund(&self) -> Money {
        self.amount - self.refunded_amount
    }

    /// Returns true when the full amount has been refunded.
    pub fn is_fully_refunded(&self) -> bool {
        self.refunded_amount >= self.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_payment(amount: Money) -> Payment {
        let mut payment = Payment::new(
            OrderId::new(),
            CustomerId::new(),
            SagaId::new(),
            amount,
            "credit_card",
        );
        payment.mark_completed("TXN_1", "REF_1");
        payment
    }

    #[test]
    fn new_payment_is_pending() {
        let payment = Payment::new(
            OrderId::new(),
            CustomerId::new(),
            SagaId::new(),
            Money::from_cents(259_998),
            "credit_card",
        );

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.refunded_amount, Money::zero());
        assert!(payment.processed_at.is_none());
        assert!(!payment.can_refund());
    }

    #[test]
    fn complete_records_gateway_references() {
        let payment = completed_payment(Money::from_cents(1000));
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.transaction_id.as_deref(), Some("TXN_1"));
        assert_eq!(payment.external_ref.as_deref(), Some("REF_1"));
        assert!(payment.processed_at.is_some());
        assert!(payment.can_refund());
    }

    #[test]
    fn full_refund_transitions_to_refunded() {
        let mut payment = completed_payment(Money::from_cents(1000));
        payment.refund("RREF_1", Money::from_cents(1000)).unwrap();

        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.refunded_amount, Money::from_cents(1000));
        assert!(payment.is_fully_refunded());
        assert!(payment.refunded_at.is_some());
        assert!(!payment.can_refund());
    }

    #[test]
    fn partial_refund_stays_completed() {
        let mut payment = completed_payment(Money::from_cents(1000));
        payment.refund("RREF_1", Money::from_cents(400)).unwrap();

        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.remaining_refund(), Money::from_cents(600));
        assert!(payment.can_refund());
    }

    #[test]
    fn refund_of_pending_payment_is_refused() {
        let mut payment = Payment::new(
            OrderId::new(),
            CustomerId::new(),
            SagaId::new(),
            Money::from_cents(1000),
            "credit_card",
        );
        let result = payment.refund("RREF_1", Money::from_cents(1000));
        assert!(matches!(result, Err(PaymentError::NotRefundable(_))));
    }

    #[test]
    fn over_refund_is_refused() {
        let mut payment = completed_payment(Money::from_cents(1000));
        let result = payment.refund("RREF_1", Money::from_cents(1001));
        assert!(matches!(
            result,
            Err(PaymentError::InvalidRefundAmount { .. })
        ));
        assert_eq!(payment.refunded_amount, Money::zero());
    }

    #[test]
    fn zero_refund_is_refused() {
        let mut payment = completed_payment(Money::from_cents(1000));
        let result = payment.refund("RREF_1", Money::zero());
        assert!(matches!(
            result,
            Err(PaymentError::InvalidRefundAmount { .. })
        ));
    }

    #[test]
    fn failed_payment_keeps_reason() {
        let mut payment = Payment::new(
            OrderId::new(),
            CustomerId::new(),
            SagaId::new(),
            Money::from_cents(1000),
            "credit_card",
        );
        payment.mark_failed("Insufficient funds");

        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("Insufficient funds"));
    }
}
