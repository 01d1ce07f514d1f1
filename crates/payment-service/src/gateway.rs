//! External payment provider adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a payment provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Provider unreachable or returned a transport-level failure.
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded the configured deadline.
    #[error("payment gateway timed out")]
    Timeout,
}

/// A charge request sent to the provider.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub payment_method: String,
    pub description: String,
}

/// The provider's answer to a charge.
#[derive(Debug, Clone)]
pub struct ChargeResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub external_ref: Option<String>,
    pub status: String,
    pub amount: Money,
    pub processed_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

/// A refund request sent to the provider.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub transaction_id: String,
    pub external_ref: Option<String>,
    pub amount: Money,
    pub reason: String,
}

/// The provider's answer to a refund.
#[derive(Debug, Clone)]
pub struct RefundResponse {
    pub success: bool,
    pub refund_id: Option<String>,
    pub refund_reference: Option<String>,
    pub amount: Money,
    pub refunded_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

/// A status lookup by the provider's external reference.
#[derive(Debug, Clone)]
pub struct PaymentStatusResponse {
    pub status: String,
    pub transaction_id: String,
    pub amount: Money,
    pub processed_at: DateTime<Utc>,
}

/// The pluggable provider contract.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn process_payment(
        &self,
        request: ChargeRequest,
    ) -> std::result::Result<ChargeResponse, GatewayError>;

    async fn refund_payment(
        &self,
        request: RefundRequest,
    ) -> std::result::Result<RefundResponse, GatewayError>;

    async fn payment_status(
        &self,
        external_ref: &str,
    ) -> std::result::Result<PaymentStatusResponse, GatewayError>;
}

/// Simulated provider with a configurable failure probability.
///
/// Charges fail at `failure_rate`; refunds at half that.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    failure_rate: f64,
}

impl SimulatedGateway {
    /// Creates a gateway with an explicit failure probability in `[0, 1]`.
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Reads `PAYMENT_FAILURE_RATE` from the environment (default `0.10`).
    pub fn from_env() -> Self {
        let rate = std::env::var("PAYMENT_FAILURE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.10);
        Self::new(rate)
    }

    fn short_ref(prefix: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{prefix}_{}", &suffix[..8])
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn process_payment(
        &self,
        request: ChargeRequest,
    ) -> std::result::Result<ChargeResponse, GatewayError> {
        tracing::debug!(
            order_id = %request.order_id,
            amount = %request.amount,
            "simulated gateway processing charge"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        if rand::random::<f64>() < self.failure_rate {
            return Ok(ChargeResponse {
                success: false,
                transaction_id: None,
                external_ref: None,
                status: "failed".to_string(),
                amount: request.amount,
                processed_at: Utc::now(),
                failure_reason: Some("Insufficient funds".to_string()),
            });
        }

        Ok(ChargeResponse {
            success: true,
            transaction_id: Some(Self::short_ref("TXN")),
            external_ref: Some(Self::short_ref("REF")),
            status: "completed".to_string(),
            amount: request.amount,
            processed_at: Utc::now(),
            failure_reason: None,
        })
    }

    async fn refund_payment(
        &self,
        request: RefundRequest,
    ) -> std::result::Result<RefundResponse, GatewayError> {
        tracing::debug!(
            transaction_id = %request.transaction_id,
            amount = %request.amount,
            "simulated gateway processing refund"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        if rand::random::<f64>() < self.failure_rate * 0.5 {
            return Ok(RefundResponse {
                success: false,
                refund_id: None,
                refund_reference: None,
                amount: request.amount,
                refunded_at: Utc::now(),
                failure_reason: Some("Refund not allowed for this transaction".to_string()),
            });
        }

        Ok(RefundResponse {
            success: true,
            refund_id: Some(Self::short_ref("RFD")),
            refund_reference: Some(Self::short_ref("RREF")),
            amount: request.amount,
            refunded_at: Utc::now(),
            failure_reason: None,
        })
    }

    async fn payment_status(
        &self,
        external_ref: &str,
    ) -> std::result::Result<PaymentStatusResponse, GatewayError> {
        Ok(PaymentStatusResponse {
            status: "completed".to_string(),
            transaction_id: format!("TXN_{external_ref}"),
            amount: Money::zero(),
            processed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            order_id: OrderId::new(),
            customer_id: CustomerId::new(),
            amount: Money::from_cents(259_998),
            currency: "USD".to_string(),
            payment_method: "credit_card".to_string(),
            description: "Order payment".to_string(),
        }
    }

    #[tokio::test]
    async fn zero_failure_rate_always_succeeds() {
        let gateway = SimulatedGateway::new(0.0);
        for _ in 0..20 {
            let response = gateway.process_payment(charge_request()).await.unwrap();
            assert!(response.success);
            assert!(response.transaction_id.as_deref().unwrap().starts_with("TXN_"));
            assert!(response.external_ref.as_deref().unwrap().starts_with("REF_"));
            assert_eq!(response.amount, Money::from_cents(259_998));
        }
    }

    #[tokio::test]
    async fn full_failure_rate_always_declines() {
        let gateway = SimulatedGateway::new(1.0);
        let response = gateway.process_payment(charge_request()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.failure_reason.as_deref(), Some("Insufficient funds"));
        assert!(response.transaction_id.is_none());
    }

    #[tokio::test]
    async fn refunds_succeed_when_charges_always_fail_half_the_time_less() {
        // Refund failure probability is half the charge rate; at 0.0 it never
        // fails.
        let gateway = SimulatedGateway::new(0.0);
        let response = gateway
            .refund_payment(RefundRequest {
                transaction_id: "TXN_1".to_string(),
                external_ref: Some("REF_1".to_string()),
                amount: Money::from_cents(100),
                reason: "compensation".to_string(),
            })
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.refund_reference.as_deref().unwrap().starts_with("RREF_"));
    }

    #[test]
    fn rate_is_clamped() {
        let gateway = SimulatedGateway::new(7.0);
        assert!((gateway.failure_rate - 1.0).abs() < f64::EPSILON);
    }
}
