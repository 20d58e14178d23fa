//! Delivery of a single rendered mail
//!
//! The dispatcher only sees [`MailTransport`]; production uses
//! [`SmtpMailTransport`], tests plug in fakes.

mod smtp;

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

pub use smtp::{Credentials, Encryption, SmtpConfig, SmtpMailTransport};

use crate::error::DeliveryError;

/// Body of an outgoing mail: HTML, optionally with a plain-text alternative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailBody {
    pub html: String,
    pub text: Option<String>,
}

impl MailBody {
    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            text: None,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// A fully rendered mail, ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: MailBody,
}

/// Sends one mail. Implementations must not retry internally.
#[async_trait]
pub trait MailTransport: Send + Sync + fmt::Debug {
    /// # Errors
    /// The failure, classified as permanent, temporary or system.
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError>;
}

/// The `From` mailbox of every mail sent by this process
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
}

impl Default for Sender {
    fn default() -> Self {
        Self {
            name: Some("Herald".to_string()),
            address: "noreply@localhost".to_string(),
        }
    }
}

impl Sender {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "\"{name}\" <{}>", self.address),
            _ => write!(f, "{}", self.address),
        }
    }
}
