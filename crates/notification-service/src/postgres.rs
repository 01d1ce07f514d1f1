//! PostgreSQL-backed notification store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, SagaId};
use domain::{Notification, NotificationStatus, NotificationType};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{NotificationServiceError, Result};
use crate::store::NotificationStore;

/// Notification store backed by the `notifications` table.
#[derive(Clone)]
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_notification(row: PgRow) -> Result<Notification> {
        let kind: String = row.try_get("type")?;
        let kind: NotificationType = kind.parse().map_err(|e: domain::StatusParseError| {
            NotificationServiceError::CorruptRow(e.to_string())
        })?;
        let status: String = row.try_get("status")?;
        let status: NotificationStatus =
            status.parse().map_err(|e: domain::StatusParseError| {
                NotificationServiceError::CorruptRow(e.to_string())
            })?;

        Ok(Notification {
            id: row.try_get::<Uuid, _>("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            kind,
            status,
            subject: row.try_get("subject")?,
            message: row.try_get("message")?,
            recipient: row.try_get("recipient")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            sent_at: row.try_get("sent_at")?,
        })
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, order_id, customer_id, saga_id, type, status,
                subject, message, recipient, created_at, sent_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(notification.id)
        .bind(notification.order_id.as_uuid())
        .bind(notification.customer_id.as_uuid())
        .bind(notification.saga_id.as_uuid())
        .bind(notification.kind.as_str())
        .bind(notification.status.as_str())
        .bind(&notification.subject)
        .bind(&notification.message)
        .bind(&notification.recipient)
        .bind(notification.created_at)
        .bind(notification.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, notification: &Notification) -> Result<()> {
        sqlx::query("UPDATE notifications SET status = $2, sent_at = $3 WHERE id = $1")
            .bind(notification.id)
            .bind(notification.status.as_str())
            .bind(notification.sent_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_notification).collect()
    }

    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "SELECT * FROM notifications WHERE saga_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_notification).transpose()
    }
}
