//! Background worker that drains the queue
//!
//! Every tick re-queues stale claims, selects a batch of due records, claims
//! each one and delivers the claimed records concurrently. The claim is the
//! only synchronisation point, so any number of dispatchers may share a store.

mod recovery;
mod tick;

use std::{sync::Arc, time::Duration};

use herald_common::{Signal, internal};
use herald_queue::QueueStore;
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info};

pub use tick::{Outcome, TickReport};

use crate::{
    envelope::validate_address,
    error::DispatchError,
    policy::RetryPolicy,
    template::TemplateStore,
    transport::{MailTransport, Sender},
};

const fn default_interval_secs() -> u64 {
    10
}

const fn default_batch_size() -> usize {
    10
}

const fn default_max_concurrent_deliveries() -> usize {
    4
}

const fn default_send_timeout_secs() -> u64 {
    30
}

const fn default_stale_after_secs() -> u64 {
    600 // 10 minutes
}

/// Tunables of the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatcherConfig {
    /// How often a tick runs (in seconds)
    ///
    /// Default: 10 seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of records selected per tick
    ///
    /// Default: 10
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum number of sends in flight within one tick
    ///
    /// Default: 4
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// Upper bound for a single send (in seconds); exceeding it is a
    /// temporary failure
    ///
    /// Default: 30 seconds
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Age after which a `processing` claim is considered abandoned (in
    /// seconds). Must exceed the send timeout.
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            send_timeout_secs: default_send_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// # Errors
    /// [`DispatchError::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let invalid = |reason: &str| Err(DispatchError::InvalidConfig(reason.to_string()));

        if self.interval_secs == 0 {
            return invalid("interval_secs must be greater than zero");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be greater than zero");
        }
        if self.max_concurrent_deliveries == 0 {
            return invalid("max_concurrent_deliveries must be greater than zero");
        }
        if self.send_timeout_secs == 0 {
            return invalid("send_timeout_secs must be greater than zero");
        }
        if self.stale_after_secs <= self.send_timeout_secs {
            return invalid("stale_after_secs must be greater than send_timeout_secs");
        }

        self.retry.validate().map_err(DispatchError::InvalidConfig)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// The dispatch loop and everything a tick needs
///
/// Cheap to clone: every field is shared.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<DispatcherConfig>,
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn MailTransport>,
    templates: Arc<TemplateStore>,
    from: Arc<str>,
}

impl Dispatcher {
    /// # Errors
    /// If `config` is invalid or `sender` is not a valid mailbox.
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn MailTransport>,
        templates: TemplateStore,
        sender: &Sender,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let from = sender.to_string();
        validate_address("from", &from)
            .map_err(|e| DispatchError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            store,
            transport,
            templates: Arc::new(templates),
            from: Arc::from(from),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Run ticks on the configured interval until a shutdown signal arrives.
    ///
    /// A tick that is running when the signal arrives finishes first. Ticks
    /// missed because a tick overran are skipped, not replayed.
    ///
    /// # Errors
    /// Per-tick failures are logged, so this currently always returns `Ok`.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), DispatchError> {
        internal!(
            level = INFO,
            "Dispatcher starting: interval={}s, batch_size={}, max_concurrent={}",
            self.config.interval_secs,
            self.config.batch_size,
            self.config.max_concurrent_deliveries
        );

        let mut timer = tokio::time::interval(self.config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.tick().await {
                        Ok(report) if report.is_idle() => debug!("Dispatcher tick found nothing to do"),
                        Ok(report) => info!(
                            claimed = report.claimed,
                            delivered = report.delivered,
                            retried = report.retried,
                            failed = report.failed,
                            recovered = report.recovered,
                            "Dispatcher tick complete"
                        ),
                        Err(e) => error!(error = %e, "Dispatcher tick failed"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Dispatcher received shutdown signal");
                        }
                        Err(e) => error!("Dispatcher shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Dispatcher shutdown complete");
        Ok(())
    }

    /// Run [`Dispatcher::serve`] on its own task.
    #[must_use]
    pub fn spawn(&self) -> DispatcherHandle {
        let (shutdown, receiver) = broadcast::channel(1);
        let dispatcher = self.clone();
        let task = tokio::spawn(async move { dispatcher.serve(receiver).await });

        DispatcherHandle { shutdown, task }
    }
}

/// Owner of a spawned dispatcher task
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: broadcast::Sender<Signal>,
    task: JoinHandle<Result<(), DispatchError>>,
}

impl DispatcherHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// # Errors
    /// If the dispatcher task panicked or returned an error.
    pub async fn stop(self) -> Result<(), DispatchError> {
        // The loop may already be gone, in which case there is nobody to tell
        let _ = self.shutdown.send(Signal::Shutdown);
        self.task.await?
    }
}
