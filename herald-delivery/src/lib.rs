//! Enqueueing and background delivery of queued mail
//!
//! - [`Enqueuer`] validates notification requests and persists them
//! - [`Dispatcher`] claims due records on an interval and sends them
//! - [`RetryPolicy`] decides whether and when a failed send is retried
//! - [`MailTransport`] abstracts the outbound relay
//! - [`MailQueueService`] exposes the queue to operators

mod dispatcher;
mod enqueuer;
mod envelope;
mod error;
pub mod policy;
mod service;
pub mod template;
pub mod transport;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, Outcome, TickReport};
pub use enqueuer::Enqueuer;
pub use envelope::MailEnvelope;
pub use error::{
    DeliveryError, DispatchError, EnqueueError, PermanentError, ServiceError, SystemError,
    TemporaryError, ValidationError,
};
pub use policy::{Backoff, RetryDecision, RetryPolicy};
pub use service::{MailQueueService, QueueAdmin, QueueStats};
pub use template::{TemplateError, TemplateStore};
pub use transport::{
    Credentials, Encryption, MailBody, MailTransport, OutgoingMail, Sender, SmtpConfig,
    SmtpMailTransport,
};
