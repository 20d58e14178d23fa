//! Operator surface over the queue
//!
//! Control interfaces (admin endpoints, CLI tooling) talk to
//! [`MailQueueService`] rather than to the store, so they can be tested
//! against a mock and never bypass the record state rules.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use herald_queue::{QueueRecord, QueueStatus, QueueStore, RecordId, RecordUpdate};
use serde::Serialize;
use tracing::info;

use crate::error::ServiceError;

/// Number of records in each status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub failed: usize,
}

impl QueueStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.success + self.failed
    }

    /// Counts keyed by the status name
    #[must_use]
    pub fn by_status(&self) -> BTreeMap<String, usize> {
        QueueStatus::ALL
            .iter()
            .map(|status| (status.to_string(), self.get(*status)))
            .collect()
    }

    #[must_use]
    pub const fn get(&self, status: QueueStatus) -> usize {
        match status {
            QueueStatus::Pending => self.pending,
            QueueStatus::Processing => self.processing,
            QueueStatus::Success => self.success,
            QueueStatus::Failed => self.failed,
        }
    }
}

/// Query and repair operations on queued mail
#[async_trait]
pub trait MailQueueService: Send + Sync {
    /// A single record.
    async fn get(&self, id: &RecordId) -> Result<QueueRecord, ServiceError>;

    /// All records, optionally filtered by status, oldest first.
    async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueRecord>, ServiceError>;

    /// Counts per status.
    async fn stats(&self) -> Result<QueueStats, ServiceError>;

    /// Give a `failed` record a fresh start: `pending`, zero retries, no
    /// schedule. Any other status is rejected.
    async fn retry(&self, id: &RecordId) -> Result<QueueRecord, ServiceError>;
}

/// [`MailQueueService`] backed directly by the queue store
#[derive(Debug, Clone)]
pub struct QueueAdmin {
    store: Arc<dyn QueueStore>,
}

impl QueueAdmin {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MailQueueService for QueueAdmin {
    async fn get(&self, id: &RecordId) -> Result<QueueRecord, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueRecord>, ServiceError> {
        Ok(self.store.list(status).await?)
    }

    async fn stats(&self) -> Result<QueueStats, ServiceError> {
        Ok(QueueStats {
            pending: self.store.count(Some(QueueStatus::Pending)).await?,
            processing: self.store.count(Some(QueueStatus::Processing)).await?,
            success: self.store.count(Some(QueueStatus::Success)).await?,
            failed: self.store.count(Some(QueueStatus::Failed)).await?,
        })
    }

    async fn retry(&self, id: &RecordId) -> Result<QueueRecord, ServiceError> {
        let record = self.store.get(id).await?;
        if record.status != QueueStatus::Failed {
            return Err(ServiceError::NotRetryable {
                id: *id,
                status: record.status,
            });
        }

        self.store.update(id, &RecordUpdate::requeue()).await?;
        info!(record_id = %id, "Failed record re-queued by operator");

        Ok(self.store.get(id).await?)
    }
}
