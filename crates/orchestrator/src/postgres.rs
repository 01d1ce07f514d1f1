//! PostgreSQL-backed saga store.
//!
//! The `version` column provides the optimistic serialization required for
//! per-saga ordering: an update names the version it read, and an update that
//! matches zero rows lost the race and surfaces a conflict for the consumer
//! to retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, SagaId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::instance::{SagaContext, SagaInstance, SagaStatus};
use crate::step::{CompensationStep, ForwardStep};
use crate::store::{SagaEventLogEntry, SagaStore};

const UNIQUE_ORDER_CONSTRAINT: &str = "saga_instances_order_id_key";

/// Saga store backed by the `saga_instances` and `saga_event_log` tables.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_saga(row: PgRow) -> Result<SagaInstance> {
        let status: String = row.try_get("status")?;
        let status: SagaStatus = status
            .parse()
            .map_err(|e: domain::StatusParseError| SagaError::CorruptRow(e.to_string()))?;
        let current_step: String = row.try_get("current_step")?;
        let current_step: ForwardStep = current_step
            .parse()
            .map_err(|e: domain::StatusParseError| SagaError::CorruptRow(e.to_string()))?;

        let completed_steps: serde_json::Value = row.try_get("completed_steps")?;
        let completed_steps: Vec<ForwardStep> = serde_json::from_value(completed_steps)?;
        let compensated_steps: serde_json::Value = row.try_get("compensated_steps")?;
        let compensated_steps: Vec<CompensationStep> = serde_json::from_value(compensated_steps)?;
        let context: serde_json::Value = row.try_get("context")?;
        let context: SagaContext = serde_json::from_value(context)?;

        Ok(SagaInstance {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            status,
            current_step,
            completed_steps,
            compensated_steps,
            failure_reason: row.try_get("failure_reason")?,
            context,
            version: row.try_get("version")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn create(&self, saga: &SagaInstance) -> Result<()> {
        let completed_steps = serde_json::to_value(&saga.completed_steps)?;
        let compensated_steps = serde_json::to_value(&saga.compensated_steps)?;
        let context = serde_json::to_value(&saga.context)?;

        sqlx::query(
            r#"
            INSERT INTO saga_instances (
                id, order_id, customer_id, status, current_step,
                completed_steps, compensated_steps, failure_reason, context,
                version, created_at, updated_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(saga.order_id.as_uuid())
        .bind(saga.customer_id.as_uuid())
        .bind(saga.status.as_str())
        .bind(saga.current_step.as_str())
        .bind(completed_steps)
        .bind(compensated_steps)
        .bind(&saga.failure_reason)
        .bind(context)
        .bind(saga.version)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .bind(saga.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(UNIQUE_ORDER_CONSTRAINT)
            {
                return SagaError::DuplicateSaga(saga.order_id);
            }
            SagaError::Database(e)
        })?;
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query("SELECT * FROM saga_instances WHERE id = $1")
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query("SELECT * FROM saga_instances WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn update(&self, saga: &mut SagaInstance) -> Result<()> {
        let completed_steps = serde_json::to_value(&saga.completed_steps)?;
        let compensated_steps = serde_json::to_value(&saga.compensated_steps)?;
        let context = serde_json::to_value(&saga.context)?;

        let result = sqlx::query(
            r#"
            UPDATE saga_instances
            SET status = $3, current_step = $4, completed_steps = $5,
                compensated_steps = $6, failure_reason = $7, context = $8,
                version = version + 1, updated_at = $9, completed_at = $10
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(saga.version)
        .bind(saga.status.as_str())
        .bind(saga.current_step.as_str())
        .bind(completed_steps)
        .bind(compensated_steps)
        .bind(&saga.failure_reason)
        .bind(context)
        .bind(saga.updated_at)
        .bind(saga.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SagaError::ConcurrencyConflict {
                saga_id: saga.id,
                expected: saga.version,
            });
        }
        saga.version += 1;
        Ok(())
    }

    async fn find_incomplete(&self) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM saga_instances
            WHERE status IN ('started', 'in_progress', 'compensating')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn append_event_log(&self, entry: &SagaEventLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_event_log (
                id, saga_id, event_type, event_data, service_name, timestamp, correlation_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.saga_id.as_uuid())
        .bind(&entry.event_type)
        .bind(&entry.event_data)
        .bind(&entry.service_name)
        .bind(entry.timestamp)
        .bind(entry.correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
