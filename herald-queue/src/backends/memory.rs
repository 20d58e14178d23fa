use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use async_trait::async_trait;

use crate::{
    QueueError, QueueRecord, QueueStatus, RecordId, RecordUpdate,
    store::{QueueStore, into_batch},
};

/// In-memory queue store
///
/// Records live in a `HashMap` behind an `RwLock`. Claims and updates take
/// the write lock, which is what makes [`QueueStore::claim`] atomic here.
///
/// # Capacity Management
/// An optional capacity turns further inserts into
/// [`QueueError::CapacityExceeded`] instead of growing without bound.
///
/// Nothing survives a restart; use the file store for durable queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    pub(crate) records: Arc<RwLock<HashMap<RecordId, QueueRecord>>>,
    capacity: Option<usize>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that holds at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of stored records
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, record: &QueueRecord) -> crate::Result<()> {
        let mut records = self.records.write()?;

        if records.contains_key(&record.id) {
            return Err(QueueError::AlreadyExists(record.id));
        }

        if let Some(capacity) = self.capacity
            && records.len() >= capacity
        {
            return Err(QueueError::CapacityExceeded {
                used: records.len(),
                capacity,
            });
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> crate::Result<QueueRecord> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or(QueueError::NotFound(*id))
    }

    async fn find_due_batch(
        &self,
        now: SystemTime,
        limit: usize,
    ) -> crate::Result<Vec<QueueRecord>> {
        let due = self
            .records
            .read()?
            .values()
            .filter(|record| record.is_due(now))
            .cloned()
            .collect();

        Ok(into_batch(due, limit))
    }

    async fn claim(&self, id: &RecordId, now: SystemTime) -> crate::Result<bool> {
        let mut records = self.records.write()?;
        let record = records.get_mut(id).ok_or(QueueError::NotFound(*id))?;

        Ok(record.try_claim(now))
    }

    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> crate::Result<()> {
        let mut records = self.records.write()?;
        let record = records.get_mut(id).ok_or(QueueError::NotFound(*id))?;

        update.apply(record)
    }

    async fn count(&self, status: Option<QueueStatus>) -> crate::Result<usize> {
        Ok(self
            .records
            .read()?
            .values()
            .filter(|record| status.is_none_or(|status| record.status == status))
            .count())
    }

    async fn list(&self, status: Option<QueueStatus>) -> crate::Result<Vec<QueueRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()?
            .values()
            .filter(|record| status.is_none_or(|status| record.status == status))
            .cloned()
            .collect();

        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    async fn requeue_stale(&self, cutoff: SystemTime) -> crate::Result<Vec<RecordId>> {
        let mut released: Vec<_> = self
            .records
            .write()?
            .values_mut()
            .filter_map(|record| record.release_if_stale(cutoff).then_some(record.id))
            .collect();

        released.sort();
        Ok(released)
    }
}
