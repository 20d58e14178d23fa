pub mod backends;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use backends::{FileQueueStore, FileQueueStoreBuilder, MemoryQueueStore, TestQueueStore};
pub use config::{MemoryConfig, StoreConfig};
pub use error::{PathError, QueueError, Result};
pub use store::QueueStore;
pub use types::{InvalidPriority, Priority, QueueRecord, QueueStatus, RecordId, RecordUpdate};
