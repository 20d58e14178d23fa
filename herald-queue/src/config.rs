use std::sync::Arc;

use serde::Deserialize;

use crate::{FileQueueStore, MemoryQueueStore, QueueStore};

/// Configuration for the queue store
///
/// Selects the store implementation at runtime from the configuration file.
///
/// # Examples
///
/// File-backed queue in RON config:
/// ```ron
/// Herald (
///     store: (
///         type: "File",
///         path: "/var/spool/herald",
///     ),
/// )
/// ```
///
/// Memory-backed queue with a capacity limit:
/// ```ron
/// Herald (
///     store: (
///         type: "Memory",
///         capacity: 1000,
///     ),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// File-based queue (production)
    File(FileQueueStore),
    /// Memory-based queue (testing/development)
    ///
    /// Can optionally specify a capacity limit to prevent unbounded memory growth
    Memory(MemoryConfig),
}

/// Configuration for the memory-backed queue
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of records to store (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File(FileQueueStore::default())
    }
}

impl StoreConfig {
    /// The queue directory for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Initialise the configured store and hand it out as a trait object
    ///
    /// # Errors
    /// Returns an error if the file store directory cannot be prepared
    pub fn into_store(self) -> crate::Result<Arc<dyn QueueStore>> {
        match self {
            Self::File(store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryQueueStore::new()) as Arc<dyn QueueStore>,
                |capacity| Arc::new(MemoryQueueStore::with_capacity(capacity)),
            )),
        }
    }
}
