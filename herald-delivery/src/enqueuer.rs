use std::{sync::Arc, time::SystemTime};

use herald_queue::{QueueRecord, QueueStatus, QueueStore, RecordId};
use tracing::{info, warn};

use crate::{
    envelope::MailEnvelope,
    error::{EnqueueError, ValidationError},
};

/// Validates notification requests and persists them as `pending` records
///
/// Cheap to clone; request handlers each hold their own copy.
#[derive(Debug, Clone)]
pub struct Enqueuer {
    store: Arc<dyn QueueStore>,
}

impl Enqueuer {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Persist `envelope` on behalf of `actor`.
    ///
    /// Never attempts delivery; the dispatcher picks the record up on a later
    /// tick.
    ///
    /// # Errors
    /// [`EnqueueError::Validation`] when the envelope is rejected (nothing is
    /// stored), [`EnqueueError::Store`] when the insert fails.
    pub async fn enqueue(
        &self,
        envelope: MailEnvelope,
        actor: &str,
    ) -> Result<QueueRecord, EnqueueError> {
        let priority = envelope.validate().inspect_err(|e| {
            warn!(to = %envelope.to, error = %e, "Rejected mail envelope");
        })?;

        if actor.trim().is_empty() {
            return Err(ValidationError::MissingActor.into());
        }

        let record = QueueRecord {
            id: RecordId::generate(),
            to: envelope.to,
            cc: envelope.cc,
            bcc: envelope.bcc,
            subject: envelope.subject,
            template_name: envelope.template_name,
            template_data: envelope.template_data,
            priority,
            scheduled_for: envelope.scheduled_for,
            status: QueueStatus::Pending,
            is_send: false,
            error_message: None,
            created_by: actor.to_string(),
            created_at: SystemTime::now(),
            send_at: None,
            retry_count: 0,
            last_retry_at: None,
        };

        self.store.insert(&record).await?;

        info!(
            record_id = %record.id,
            priority = %record.priority,
            template = %record.template_name,
            "Queued mail"
        );

        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_queue::{MemoryQueueStore, Priority};

    use super::*;

    #[tokio::test]
    async fn test_enqueue_persists_pending_record() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let record = enqueuer
            .enqueue(
                MailEnvelope::new("pm@example.com", "Report filed", "report-filed")
                    .with_data("report", "Q3")
                    .with_priority(1),
                "user-7",
            )
            .await
            .unwrap();

        assert_eq!(record.status, QueueStatus::Pending);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.send_at, None);
        assert!(!record.is_send);
        assert_eq!(record.created_by, "user-7");
        assert_eq!(store.get(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_rejected_envelope_is_not_persisted() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let err = enqueuer
            .enqueue(MailEnvelope::new("", "x", "welcome"), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::Validation(ValidationError::MissingRecipient)
        ));

        let err = enqueuer
            .enqueue(MailEnvelope::new("a@example.com", "x", "welcome"), " ")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::Validation(ValidationError::MissingActor)
        ));

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = Arc::new(MemoryQueueStore::with_capacity(0));
        let enqueuer = Enqueuer::new(store);

        let err = enqueuer
            .enqueue(MailEnvelope::new("a@example.com", "x", "welcome"), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Store(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_are_independent() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let mut handles = Vec::new();
        for n in 0..20 {
            let enqueuer = enqueuer.clone();
            handles.push(tokio::spawn(async move {
                enqueuer
                    .enqueue(
                        MailEnvelope::new(format!("user{n}@example.com"), "Hi", "welcome"),
                        "system",
                    )
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 20);
    }
}
