use std::time::SystemTime;

use herald_queue::Priority;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// A notification request as it arrives from business code
///
/// Nothing here is trusted: [`MailEnvelope::validate`] runs before anything
/// is persisted, which is why `priority` is a raw integer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailEnvelope {
    pub to: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub template_name: String,
    #[serde(default)]
    pub template_data: Map<String, Value>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub scheduled_for: Option<SystemTime>,
}

impl MailEnvelope {
    #[must_use]
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            template_name: template_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    #[must_use]
    pub fn with_bcc(mut self, bcc: impl Into<String>) -> Self {
        self.bcc.push(bcc.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn scheduled_for(mut self, at: SystemTime) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Add a template variable
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_data.insert(key.into(), value.into());
        self
    }

    /// Check the envelope and resolve its priority.
    ///
    /// # Errors
    /// The first problem found, checked in field order.
    pub fn validate(&self) -> Result<Priority, ValidationError> {
        if self.to.trim().is_empty() {
            return Err(ValidationError::MissingRecipient);
        }
        if self.subject.trim().is_empty() {
            return Err(ValidationError::MissingSubject);
        }
        if self.template_name.trim().is_empty() {
            return Err(ValidationError::MissingTemplate);
        }

        validate_address("to", &self.to)?;
        for cc in &self.cc {
            validate_address("cc", cc)?;
        }
        for bcc in &self.bcc {
            validate_address("bcc", bcc)?;
        }

        self.priority
            .map_or(Ok(Priority::default()), Priority::try_from)
            .map_err(ValidationError::from)
    }
}

/// Require exactly one mailbox with a non-empty local part and domain
pub(crate) fn validate_address(field: &'static str, address: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidAddress {
        field,
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let parsed = mailparse::addrparse(address).map_err(|e| invalid(&e.to_string()))?;
    let single = parsed
        .extract_single_info()
        .ok_or_else(|| invalid("expected exactly one mailbox"))?;

    match single.addr.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(invalid("expected local@domain")),
    }
}
