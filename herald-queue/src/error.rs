//! Error types for the herald-queue crate.
//!
//! Every store operation returns [`QueueError`], which separates I/O,
//! serialization, missing records, state conflicts and misconfiguration.

use std::io;

use thiserror::Error;

use crate::RecordId;

/// Top-level queue store error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found in the store.
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// A record with the same id is already stored.
    #[error("Record already exists: {0}")]
    AlreadyExists(RecordId),

    /// The record was delivered and can no longer change.
    #[error("Record {0} is delivered and cannot be modified")]
    Terminal(RecordId),

    /// The store refused a write because it is full.
    #[error("Queue capacity exceeded: {used}/{capacity} records")]
    CapacityExceeded { used: usize, capacity: usize },

    /// Store location validation failed.
    #[error("Store path error: {0}")]
    Path(#[from] PathError),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Store directory validation errors.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Queue path cannot contain '..' components: {0}")]
    ParentComponent(String),

    #[error("Queue path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Queue path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },

    #[error("Queue path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for queue store operations.
pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
