use std::time::SystemTime;

use async_trait::async_trait;

use crate::{QueueRecord, QueueStatus, RecordId, RecordUpdate};

/// Persistence primitives the mail queue needs from a durable store.
///
/// Implementations must make [`QueueStore::claim`] atomic: when several
/// callers race to claim the same record, exactly one of them observes
/// `true`. Every other method only needs per-record atomicity.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Persist a new record.
    ///
    /// # Errors
    /// [`crate::QueueError::AlreadyExists`] if the id is taken, or any storage failure.
    async fn insert(&self, record: &QueueRecord) -> crate::Result<()>;

    /// Read a single record.
    ///
    /// # Errors
    /// [`crate::QueueError::NotFound`] if there is no such record.
    async fn get(&self, id: &RecordId) -> crate::Result<QueueRecord>;

    /// Up to `limit` pending records that are due at `now`, in dispatch order
    /// (priority, then due time, then enqueue order).
    async fn find_due_batch(&self, now: SystemTime, limit: usize)
    -> crate::Result<Vec<QueueRecord>>;

    /// Conditionally move a record from `pending` to `processing`, stamping
    /// `send_at = now`. Returns `false` when the record is no longer pending.
    async fn claim(&self, id: &RecordId, now: SystemTime) -> crate::Result<bool>;

    /// Apply `update` to a stored record.
    ///
    /// # Errors
    /// [`crate::QueueError::Terminal`] for delivered records,
    /// [`crate::QueueError::NotFound`] for unknown ids.
    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> crate::Result<()>;

    /// Number of records, optionally restricted to one status.
    async fn count(&self, status: Option<QueueStatus>) -> crate::Result<usize>;

    /// All records, optionally restricted to one status, oldest first.
    async fn list(&self, status: Option<QueueStatus>) -> crate::Result<Vec<QueueRecord>>;

    /// Return every `processing` record claimed before `cutoff` to `pending`.
    async fn requeue_stale(&self, cutoff: SystemTime) -> crate::Result<Vec<RecordId>>;
}

/// Sort `records` into dispatch order and keep the first `limit`.
pub(crate) fn into_batch(mut records: Vec<QueueRecord>, limit: usize) -> Vec<QueueRecord> {
    records.sort_by(QueueRecord::dispatch_order);
    records.truncate(limit);
    records
}
