use std::{fmt, time::Duration};

use async_trait::async_trait;
use herald_common::internal;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, header::ContentType},
    transport::smtp::{
        authentication,
        client::{Tls, TlsParameters},
    },
};
use serde::Deserialize;

use super::{MailBody, MailTransport, OutgoingMail, Sender};
use crate::error::{DeliveryError, SystemError};

const fn default_port() -> u16 {
    587
}

const fn default_timeout_secs() -> u64 {
    30
}

/// How the connection to the relay is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Encryption {
    /// Implicit TLS from the first byte (usually port 465)
    Ssl,
    /// Plain connection upgraded with STARTTLS, which must succeed
    #[default]
    StartTls,
    /// No encryption (local relays and tests only)
    None,
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings for the outbound relay
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    /// Default: 587
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default: `StartTls`
    #[serde(default)]
    pub encryption: Encryption,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Mailbox used as `From` on every mail
    #[serde(default)]
    pub sender: Sender,

    /// Connection and command timeout (in seconds)
    ///
    /// Default: 30 seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Accept invalid TLS certificates (for testing only)
    ///
    /// **SECURITY WARNING**: disables certificate validation for the relay.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            encryption: Encryption::default(),
            credentials: None,
            sender: Sender::default(),
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

/// [`MailTransport`] backed by a pooled async SMTP relay connection
#[derive(Clone)]
pub struct SmtpMailTransport {
    host: String,
    port: u16,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl fmt::Debug for SmtpMailTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl SmtpMailTransport {
    /// Build the relay client. No connection is made until the first send.
    ///
    /// # Errors
    /// If the TLS parameters cannot be built for `config.host`.
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let tls_parameters = || {
            TlsParameters::builder(config.host.clone())
                .dangerous_accept_invalid_certs(config.accept_invalid_certs)
                .build()
                .map_err(|e| SystemError::Configuration(format!("Invalid TLS settings: {e}")))
        };

        let tls = match config.encryption {
            Encryption::Ssl => Tls::Wrapper(tls_parameters()?),
            Encryption::StartTls => Tls::Required(tls_parameters()?),
            Encryption::None => Tls::None,
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(credentials) = &config.credentials {
            builder = builder.credentials(authentication::Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ));
        }

        internal!(
            "SMTP transport configured for {}:{} ({:?})",
            config.host,
            config.port,
            config.encryption
        );

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            mailer: builder.build(),
        })
    }
}

/// Assemble the MIME message for `mail`
pub(crate) fn build_message(mail: &OutgoingMail) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(mail.from.parse::<Mailbox>()?)
        .to(mail.to.parse::<Mailbox>()?)
        .subject(mail.subject.as_str());

    for cc in &mail.cc {
        builder = builder.cc(cc.parse::<Mailbox>()?);
    }
    for bcc in &mail.bcc {
        builder = builder.bcc(bcc.parse::<Mailbox>()?);
    }

    let MailBody { html, text } = &mail.body;
    let message = match text {
        Some(text) => {
            builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))?
        }
        None => builder.header(ContentType::TEXT_HTML).body(html.clone())?,
    };

    Ok(message)
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(host = %self.host, to = %mail.to))]
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let message = build_message(mail)?;
        self.mailer.send(message).await?;
        Ok(())
    }
}
