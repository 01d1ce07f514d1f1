//! PostgreSQL-backed payment store.
//!
//! Monetary columns hold cents as BIGINT; the scale is fixed at two
//! fractional digits. The unique index on `order_id` is what turns a
//! duplicate `payment.process` into a detectable collision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, SagaId};
use domain::{Payment, PaymentStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{PaymentServiceError, Result};
use crate::store::PaymentStore;

const UNIQUE_ORDER_CONSTRAINT: &str = "payments_order_id_key";

/// Payment store backed by the `payments` table.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let status: PaymentStatus = status
            .parse()
            .map_err(|e: domain::StatusParseError| PaymentServiceError::CorruptRow(e.to_string()))?;

        Ok(Payment {
            id: row.try_get::<Uuid, _>("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            amount: Money::from_cents(row.try_get::<i64, _>("amount_cents")?),
            payment_method: row.try_get("payment_method")?,
            status,
            transaction_id: row.try_get("transaction_id")?,
            external_ref: row.try_get("external_ref")?,
            failure_reason: row.try_get("failure_reason")?,
            refunded_amount: Money::from_cents(row.try_get::<i64, _>("refunded_amount_cents")?),
            refund_reference: row.try_get("refund_reference")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            processed_at: row.try_get("processed_at")?,
            refunded_at: row.try_get("refunded_at")?,
        })
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, customer_id, saga_id, amount_cents, payment_method,
                status, transaction_id, external_ref, failure_reason,
                refunded_amount_cents, refund_reference, created_at, updated_at,
                processed_at, refunded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id.as_uuid())
        .bind(payment.customer_id.as_uuid())
        .bind(payment.saga_id.as_uuid())
        .bind(payment.amount.cents())
        .bind(&payment.payment_method)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.external_ref)
        .bind(&payment.failure_reason)
        .bind(payment.refunded_amount.cents())
        .bind(&payment.refund_reference)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.processed_at)
        .bind(payment.refunded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(UNIQUE_ORDER_CONSTRAINT)
            {
                return PaymentServiceError::DuplicateOrder(payment.order_id);
            }
            PaymentServiceError::Database(e)
        })?;
        Ok(())
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, transaction_id = $3, external_ref = $4,
                failure_reason = $5, refunded_amount_cents = $6,
                refund_reference = $7, updated_at = $8, processed_at = $9,
                refunded_at = $10
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.external_ref)
        .bind(&payment.failure_reason)
        .bind(payment.refunded_amount.cents())
        .bind(&payment.refund_reference)
        .bind(payment.updated_at)
        .bind(payment.processed_at)
        .bind(payment.refunded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>> {
        let row = sqlx::query(
            "SELECT * FROM payments WHERE saga_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_payment).transpose()
    }
}
