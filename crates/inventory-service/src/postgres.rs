//! PostgreSQL-backed inventory store.
//!
//! `reserve_items` runs inside one transaction with `SELECT ... FOR UPDATE`
//! per product row, which serializes concurrent reservations of the same
//! product and makes the multi-item batch atomic: any failing item aborts the
//! transaction and nothing is reserved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, SagaId};
use domain::{InventoryReservation, Product, ReservationStatus};
use messaging::payloads::ReserveItem;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{InventoryServiceError, Result};
use crate::store::InventoryStore;

/// Inventory store backed by the `products` and `inventory_reservations`
/// tables.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get::<i64, _>("price_cents")?),
            stock: row.try_get::<i32, _>("stock")? as u32,
            reserved_stock: row.try_get::<i32, _>("reserved_stock")? as u32,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<InventoryReservation> {
        let status: String = row.try_get("status")?;
        let status: ReservationStatus = status.parse().map_err(|e: domain::StatusParseError| {
            InventoryServiceError::CorruptRow(e.to_string())
        })?;

        Ok(InventoryReservation {
            id: row.try_get::<Uuid, _>("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            status,
            reserved_at: row.try_get::<DateTime<Utc>, _>("reserved_at")?,
            expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock, reserved_stock, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(product.stock as i32)
        .bind(product.reserved_stock as i32)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_product).transpose()
    }

    async fn reserve_items(
        &self,
        order_id: OrderId,
        saga_id: SagaId,
        items: &[ReserveItem],
    ) -> Result<Vec<InventoryReservation>> {
        let mut tx = self.pool.begin().await?;
        let mut reservations = Vec::with_capacity(items.len());

        for item in items {
            if item.quantity == 0 {
                return Err(InventoryServiceError::ZeroQuantity(item.product_id));
            }

            let row = sqlx::query(
                "SELECT stock, reserved_stock FROM products WHERE id = $1 FOR UPDATE",
            )
            .bind(item.product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(InventoryServiceError::ProductNotFound(item.product_id))?;

            let stock = row.try_get::<i32, _>("stock")? as u32;
            let reserved = row.try_get::<i32, _>("reserved_stock")? as u32;
            let available = stock - reserved;
            if available < item.quantity {
                // Dropping the transaction rolls back every prior item.
                return Err(InventoryServiceError::InsufficientStock {
                    product_id: item.product_id,
                    available,
                    requested: item.quantity,
                });
            }

            sqlx::query(
                "UPDATE products SET reserved_stock = reserved_stock + $2, updated_at = $3 WHERE id = $1",
            )
            .bind(item.product_id.as_uuid())
            .bind(item.quantity as i32)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            let reservation =
                InventoryReservation::new(order_id, item.product_id, saga_id, item.quantity);
            sqlx::query(
                r#"
                INSERT INTO inventory_reservations (
                    id, order_id, product_id, saga_id, quantity, status,
                    reserved_at, expires_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(reservation.id)
            .bind(reservation.order_id.as_uuid())
            .bind(reservation.product_id.as_uuid())
            .bind(reservation.saga_id.as_uuid())
            .bind(reservation.quantity as i32)
            .bind(reservation.status.as_str())
            .bind(reservation.reserved_at)
            .bind(reservation.expires_at)
            .bind(reservation.updated_at)
            .execute(&mut *tx)
            .await?;

            reservations.push(reservation);
        }

        tx.commit().await?;
        Ok(reservations)
    }

    async fn reservations_by_saga(&self, saga_id: SagaId) -> Result<Vec<InventoryReservation>> {
        let rows = sqlx::query(
            "SELECT * FROM inventory_reservations WHERE saga_id = $1 ORDER BY reserved_at",
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn release_by_saga(&self, saga_id: SagaId) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity FROM inventory_reservations
            WHERE saga_id = $1 AND status = 'reserved'
            FOR UPDATE
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let mut released = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let product_id: Uuid = row.try_get("product_id")?;
            let quantity: i32 = row.try_get("quantity")?;

            sqlx::query(
                r#"
                UPDATE products
                SET reserved_stock = GREATEST(reserved_stock - $2, 0), updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(product_id)
            .bind(quantity)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE inventory_reservations SET status = 'released', updated_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            released.push(id);
        }

        tx.commit().await?;
        Ok(released)
    }

    async fn mark_sold_by_saga(&self, saga_id: SagaId) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity FROM inventory_reservations
            WHERE saga_id = $1 AND status = 'reserved'
            FOR UPDATE
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let mut sold = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let product_id: Uuid = row.try_get("product_id")?;
            let quantity: i32 = row.try_get("quantity")?;

            sqlx::query(
                r#"
                UPDATE products
                SET stock = GREATEST(stock - $2, 0),
                    reserved_stock = GREATEST(reserved_stock - $2, 0),
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(product_id)
            .bind(quantity)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE inventory_reservations SET status = 'sold', updated_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            sold.push(id);
        }

        tx.commit().await?;
        Ok(sold)
    }
}
