use std::sync::{Arc, LazyLock};

use herald_common::{Signal, internal, logging};
use herald_delivery::{
    Dispatcher, DispatcherConfig, Enqueuer, QueueAdmin, SmtpConfig, SmtpMailTransport,
    TemplateStore,
};
use herald_queue::{QueueStore, StoreConfig};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::warn;

/// Top-level configuration of a herald process
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    #[serde(alias = "queue", default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub templates: TemplateStore,
}

/// Handles onto a running queue
///
/// `enqueuer` is what business code calls to request a notification, `admin`
/// is the operator view of the same store.
#[derive(Debug, Clone)]
pub struct Services {
    pub store: Arc<dyn QueueStore>,
    pub enqueuer: Enqueuer,
    pub admin: QueueAdmin,
    pub dispatcher: Dispatcher,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    // The dispatcher finishes its current tick and wins the select in `run`;
    // a second CTRL+C stops waiting for it
    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Herald {
    /// Open the store and build everything that talks to it.
    ///
    /// Nothing is sent and no connection is made; the SMTP relay is first
    /// contacted by the dispatcher's first delivery.
    ///
    /// # Errors
    /// If the store cannot be initialised or the dispatcher or transport
    /// configuration is invalid.
    pub fn init(self) -> anyhow::Result<Services> {
        let store = self.store.into_store()?;
        let transport = Arc::new(SmtpMailTransport::new(&self.smtp)?);

        if !self.templates.dir().is_dir() {
            warn!(
                dir = %self.templates.dir().display(),
                "Template directory does not exist, every delivery will fail"
            );
        }

        let dispatcher = Dispatcher::new(
            self.dispatcher,
            Arc::clone(&store),
            transport,
            self.templates,
            &self.smtp.sender,
        )?;

        Ok(Services {
            enqueuer: Enqueuer::new(Arc::clone(&store)),
            admin: QueueAdmin::new(Arc::clone(&store)),
            dispatcher,
            store,
        })
    }

    /// Run the dispatcher until the process is asked to stop
    ///
    /// # Errors
    /// If initialisation fails or the signal handlers cannot be installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        let services = self.init()?;

        internal!(level = INFO, "Controller running");

        let ret = tokio::select! {
            r = services.dispatcher.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use herald_delivery::{Encryption, MailEnvelope, MailQueueService};
    use herald_queue::{MemoryConfig, QueueStatus};

    use super::*;

    fn memory_config() -> Herald {
        Herald {
            store: StoreConfig::Memory(MemoryConfig::default()),
            smtp: SmtpConfig {
                host: "127.0.0.1".to_string(),
                port: 2525,
                encryption: Encryption::None,
                ..SmtpConfig::default()
            },
            ..Herald::default()
        }
    }

    #[tokio::test]
    async fn test_services_share_one_store() {
        let services = memory_config().init().unwrap();

        let record = services
            .enqueuer
            .enqueue(MailEnvelope::new("pm@example.com", "Hi", "welcome"), "user-1")
            .await
            .unwrap();

        assert_eq!(services.admin.get(&record.id).await.unwrap(), record);
        assert_eq!(services.admin.stats().await.unwrap().pending, 1);
        assert_eq!(
            services.store.count(Some(QueueStatus::Pending)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_dispatcher_config_is_rejected() {
        let mut config = memory_config();
        config.dispatcher.batch_size = 0;
        assert!(config.init().is_err());

        let mut config = memory_config();
        config.smtp.sender.address = "not an address".to_string();
        assert!(config.init().is_err());
    }

    #[tokio::test]
    async fn test_dispatcher_stops_on_broadcast_shutdown() {
        let services = memory_config().init().unwrap();
        let receiver = SHUTDOWN_BROADCAST.subscribe();

        let dispatcher = services.dispatcher.clone();
        let task = tokio::spawn(async move { dispatcher.serve(receiver).await });

        SHUTDOWN_BROADCAST.send(Signal::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
