//! Typed error handling for enqueueing and delivery.
//!
//! Delivery failures are split into:
//! - Permanent failures (5xx SMTP codes, bad addresses, missing templates) - don't retry
//! - Temporary failures (4xx SMTP codes, network trouble, timeouts) - retry with backoff
//! - System errors - internal problems, retried like temporary failures

use herald_queue::{InvalidPriority, QueueError, QueueStatus, RecordId};
use thiserror::Error;

/// Rejection of an envelope at enqueue time. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Recipient address is required")]
    MissingRecipient,

    #[error("Subject is required")]
    MissingSubject,

    #[error("Template name is required")]
    MissingTemplate,

    #[error("Actor id is required")]
    MissingActor,

    #[error("Invalid {field} address '{address}': {reason}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        reason: String,
    },

    #[error(transparent)]
    InvalidPriority(#[from] InvalidPriority),
}

/// Failure of [`crate::Enqueuer::enqueue`]
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to persist record: {0}")]
    Store(#[from] QueueError),
}

/// Top-level delivery error type.
///
/// The category decides what the dispatcher does with the record: permanent
/// failures go straight to `failed`, everything else goes through the retry
/// policy.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (I/O, internal errors, etc.).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient or sender address is invalid or rejected by the server.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Message was rejected by the server (e.g., policy violation, unknown user).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The named template does not exist.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The template name is not a plain file name.
    #[error("Invalid template name: {0}")]
    InvalidTemplate(String),

    /// The message could not be assembled from the record.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

/// Temporary errors that should be retried with backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to establish a connection to the mail server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The send did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Server returned a temporary failure code.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Classify SMTP transport errors.
///
/// - **5xx replies** → Permanent
/// - **4xx replies** → Temporary
/// - **Timeouts, TLS and connection errors** → Temporary
/// - **Client-side errors** → System
impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        if error.is_permanent() {
            Self::Permanent(PermanentError::MessageRejected(error.to_string()))
        } else if error.is_transient() {
            Self::Temporary(TemporaryError::SmtpTemporary(error.to_string()))
        } else if error.is_timeout() {
            Self::Temporary(TemporaryError::Timeout(error.to_string()))
        } else if error.is_tls() {
            Self::Temporary(TemporaryError::TlsHandshakeFailed(error.to_string()))
        } else if error.is_client() {
            Self::System(SystemError::Internal(error.to_string()))
        } else {
            Self::Temporary(TemporaryError::ConnectionFailed(error.to_string()))
        }
    }
}

impl From<lettre::address::AddressError> for DeliveryError {
    fn from(error: lettre::address::AddressError) -> Self {
        Self::Permanent(PermanentError::InvalidAddress(error.to_string()))
    }
}

impl From<lettre::error::Error> for DeliveryError {
    fn from(error: lettre::error::Error) -> Self {
        Self::Permanent(PermanentError::MalformedMessage(error.to_string()))
    }
}

/// Errors raised by the dispatcher itself, as opposed to per-record failures
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue store error: {0}")]
    Store(#[from] QueueError),

    #[error("Dispatcher task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised by the operator surface
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] QueueError),

    #[error("Record {id} is {status}, only failed records can be retried")]
    NotRetryable { id: RecordId, status: QueueStatus },
}
