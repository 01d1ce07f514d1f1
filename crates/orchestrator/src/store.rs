//! Saga persistence contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use uuid::Uuid;

use crate::error::Result;
use crate::instance::SagaInstance;

/// One row of the saga audit trail.
#[derive(Debug, Clone)]
pub struct SagaEventLogEntry {
    pub id: Uuid,
    pub saga_id: SagaId,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
}

/// Storage for saga instances and the audit log.
///
/// `update` uses optimistic concurrency: the caller's `version` must match
/// the stored row or the update fails with `ConcurrencyConflict`. Concurrent
/// duplicates therefore block on the retry path and observe the
/// already-advanced state instead of double-advancing the saga.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new saga. Fails with `DuplicateSaga` when the order already
    /// has one (at most one saga per order).
    async fn create(&self, saga: &SagaInstance) -> Result<()>;

    /// Loads a saga by its ID.
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaInstance>>;

    /// Loads a saga by the order it drives.
    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<SagaInstance>>;

    /// Persists an updated saga, bumping its version on success.
    async fn update(&self, saga: &mut SagaInstance) -> Result<()>;

    /// Returns sagas in `started`, `in_progress`, or `compensating`, oldest
    /// first. Used by crash recovery.
    async fn find_incomplete(&self) -> Result<Vec<SagaInstance>>;

    /// Appends an entry to the saga audit log.
    async fn append_event_log(&self, entry: &SagaEventLogEntry) -> Result<()>;
}
