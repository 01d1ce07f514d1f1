//! PostgreSQL-backed shipment store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, SagaId};
use domain::{Shipment, ShipmentStatus, ShippingAddress};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, ShippingServiceError};
use crate::store::ShipmentStore;

const UNIQUE_ORDER_CONSTRAINT: &str = "shipments_order_id_key";

/// Shipment store backed by the `shipments` table. The destination address
/// is stored as a JSONB column.
#[derive(Clone)]
pub struct PostgresShipmentStore {
    pool: PgPool,
}

impl PostgresShipmentStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_shipment(row: PgRow) -> Result<Shipment> {
        let status: String = row.try_get("status")?;
        let status: ShipmentStatus = status.parse().map_err(|e: domain::StatusParseError| {
            ShippingServiceError::CorruptRow(e.to_string())
        })?;
        let address: serde_json::Value = row.try_get("address")?;
        let address: ShippingAddress = serde_json::from_value(address)?;

        Ok(Shipment {
            id: row.try_get::<Uuid, _>("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            status,
            tracking_id: row.try_get("tracking_id")?,
            address,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl ShipmentStore for PostgresShipmentStore {
    async fn insert(&self, shipment: &Shipment) -> Result<()> {
        let address = serde_json::to_value(&shipment.address)?;
        sqlx::query(
            r#"
            INSERT INTO shipments (
                id, order_id, customer_id, saga_id, status, tracking_id,
                address, failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(shipment.id)
        .bind(shipment.order_id.as_uuid())
        .bind(shipment.customer_id.as_uuid())
        .bind(shipment.saga_id.as_uuid())
        .bind(shipment.status.as_str())
        .bind(&shipment.tracking_id)
        .bind(address)
        .bind(&shipment.failure_reason)
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(UNIQUE_ORDER_CONSTRAINT)
            {
                return ShippingServiceError::DuplicateOrder(shipment.order_id);
            }
            ShippingServiceError::Database(e)
        })?;
        Ok(())
    }

    async fn update(&self, shipment: &Shipment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE shipments
            SET status = $2, failure_reason = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(shipment.id)
        .bind(shipment.status.as_str())
        .bind(&shipment.failure_reason)
        .bind(shipment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Shipment>> {
        let row = sqlx::query("SELECT * FROM shipments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_shipment).transpose()
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Shipment>> {
        let row = sqlx::query("SELECT * FROM shipments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_shipment).transpose()
    }

    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Shipment>> {
        let row = sqlx::query(
            "SELECT * FROM shipments WHERE saga_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_shipment).transpose()
    }
}
