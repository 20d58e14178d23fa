use std::time::SystemTime;

use herald_queue::{QueueRecord, RecordUpdate};
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, error, info, warn};

use super::Dispatcher;
use crate::{
    error::{DeliveryError, DispatchError, TemporaryError},
    policy::RetryDecision,
    transport::OutgoingMail,
};

/// What happened to one claimed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Retried {
        retry_count: u32,
        next_attempt: SystemTime,
    },
    Failed,
    /// The send finished but its result could not be stored; the record
    /// stays `processing` until stale recovery picks it up.
    Unrecorded,
}

/// Counters for a single tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Stale claims returned to `pending` before selection
    pub recovered: usize,
    pub selected: usize,
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub unrecorded: usize,
}

impl TickReport {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.recovered == 0 && self.selected == 0
    }

    const fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Delivered => self.delivered += 1,
            Outcome::Retried { .. } => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Unrecorded => self.unrecorded += 1,
        }
    }
}

impl Dispatcher {
    /// Run one dispatch cycle against the wall clock.
    ///
    /// # Errors
    /// Only if the batch cannot be selected; per-record failures are isolated.
    pub async fn tick(&self) -> Result<TickReport, DispatchError> {
        self.tick_at(SystemTime::now()).await
    }

    /// Run one dispatch cycle as if the current time were `now`.
    ///
    /// # Errors
    /// Only if the batch cannot be selected; per-record failures are isolated.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick_at(&self, now: SystemTime) -> Result<TickReport, DispatchError> {
        let mut report = TickReport {
            recovered: self.recover_stale(now).await,
            ..TickReport::default()
        };

        let batch = self
            .store
            .find_due_batch(now, self.config.batch_size)
            .await?;
        report.selected = batch.len();

        // Records are claimed one at a time just before their delivery
        // starts, so a claim's `send_at` never ages while it waits for a
        // free delivery slot.
        let started = Instant::now();
        let mut join_set = JoinSet::new();
        let mut batch = batch.into_iter();

        for _ in 0..self.config.max_concurrent_deliveries {
            if !self
                .start_next(&mut join_set, &mut batch, now, started, &mut report)
                .await
            {
                break;
            }
        }

        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(e) => error!(error = %e, "Delivery task panicked"),
            }

            self.start_next(&mut join_set, &mut batch, now, started, &mut report)
                .await;
        }

        Ok(report)
    }

    /// Claim the next claimable record of the batch and spawn its delivery.
    /// Returns `false` once the batch is exhausted.
    async fn start_next(
        &self,
        join_set: &mut JoinSet<Outcome>,
        batch: &mut impl Iterator<Item = QueueRecord>,
        now: SystemTime,
        started: Instant,
        report: &mut TickReport,
    ) -> bool {
        for mut record in batch.by_ref() {
            let claimed_at = now + started.elapsed();
            match self.store.claim(&record.id, claimed_at).await {
                Ok(true) => {
                    record.try_claim(claimed_at);
                    report.claimed += 1;

                    let dispatcher = self.clone();
                    join_set.spawn(async move { dispatcher.deliver(record, claimed_at).await });
                    return true;
                }
                Ok(false) => debug!(record_id = %record.id, "Record already claimed elsewhere"),
                Err(e) => warn!(record_id = %record.id, error = %e, "Failed to claim record"),
            }
        }

        false
    }

    /// Attempt one claimed record and store the result; retries are
    /// scheduled from the claim time
    async fn deliver(&self, record: QueueRecord, now: SystemTime) -> Outcome {
        let (update, outcome) = match self.attempt(&record).await {
            Ok(()) => {
                info!(
                    record_id = %record.id,
                    priority = %record.priority,
                    retry_count = record.retry_count,
                    "Mail delivered"
                );
                (RecordUpdate::delivered(), Outcome::Delivered)
            }
            Err(error) => match self.config.retry.decide(record.retry_count, &error) {
                RetryDecision::Retry { delay } => {
                    let retry_count = record.retry_count + 1;
                    let next_attempt = now + delay;
                    warn!(
                        record_id = %record.id,
                        priority = %record.priority,
                        retry_count,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "Delivery failed, will retry"
                    );
                    (
                        RecordUpdate::retry(retry_count, now, next_attempt, error.to_string()),
                        Outcome::Retried {
                            retry_count,
                            next_attempt,
                        },
                    )
                }
                RetryDecision::GiveUp => {
                    error!(
                        record_id = %record.id,
                        priority = %record.priority,
                        retry_count = record.retry_count,
                        permanent = error.is_permanent(),
                        error = %error,
                        "Delivery failed, giving up"
                    );
                    (RecordUpdate::failed(error.to_string()), Outcome::Failed)
                }
            },
        };

        match self.store.update(&record.id, &update).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(
                    record_id = %record.id,
                    error = %e,
                    "Failed to store delivery result"
                );
                Outcome::Unrecorded
            }
        }
    }

    /// Render the record and hand it to the transport, both within the send
    /// timeout
    async fn attempt(&self, record: &QueueRecord) -> Result<(), DeliveryError> {
        let send = async {
            let body = self
                .templates
                .render(&record.template_name, &record.template_data)
                .await?;

            let mail = OutgoingMail {
                from: self.from.to_string(),
                to: record.to.clone(),
                cc: record.cc.clone(),
                bcc: record.bcc.clone(),
                subject: record.subject.clone(),
                body,
            };

            self.transport.send(&mail).await
        };

        tokio::time::timeout(self.config.send_timeout(), send)
            .await
            .unwrap_or_else(|_| {
                Err(TemporaryError::Timeout(format!(
                    "render and send did not complete within {}s",
                    self.config.send_timeout_secs
                ))
                .into())
            })
    }
}
