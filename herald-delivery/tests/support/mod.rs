//! Shared fixtures for the delivery integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod relay;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use herald_delivery::{
    DeliveryError, Dispatcher, DispatcherConfig, Enqueuer, MailTransport, OutgoingMail,
    PermanentError, Sender, TemplateStore, TemporaryError,
};
use herald_queue::{QueueStore, TestQueueStore};
use tempfile::TempDir;

/// How the [`ScriptedTransport`] answers a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Accept,
    /// Fail each recipient with a temporary error this many times, then accept
    FailTimes(usize),
    AlwaysTemporary,
    AlwaysPermanent,
    /// Never answer
    Hang,
    /// Accept after this long
    Delay(Duration),
}

/// In-process [`MailTransport`] that records every attempt
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Script,
    attempts: Mutex<Vec<OutgoingMail>>,
    delivered: Mutex<Vec<OutgoingMail>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            attempts: Mutex::default(),
            delivered: Mutex::default(),
            failures: Mutex::default(),
        })
    }

    /// Recipients of every attempt, in the order they were made
    pub fn attempted(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|mail| mail.to.clone())
            .collect()
    }

    /// Recipients of accepted mail, in the order they were accepted
    pub fn delivered_to(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|mail| mail.to.clone())
            .collect()
    }

    pub fn delivered(&self) -> Vec<OutgoingMail> {
        self.delivered.lock().unwrap().clone()
    }

    fn should_fail(&self, to: &str, times: usize) -> bool {
        let mut failures = self.failures.lock().unwrap();
        let seen = failures.entry(to.to_string()).or_default();
        if *seen < times {
            *seen += 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        self.attempts.lock().unwrap().push(mail.clone());

        match self.script {
            Script::Accept => {}
            Script::FailTimes(times) => {
                if self.should_fail(&mail.to, times) {
                    return Err(TemporaryError::SmtpTemporary("451 try again later".into()).into());
                }
            }
            Script::AlwaysTemporary => {
                return Err(TemporaryError::ConnectionFailed("connection refused".into()).into());
            }
            Script::AlwaysPermanent => {
                return Err(PermanentError::MessageRejected("550 no such user".into()).into());
            }
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Script::Delay(delay) => {
                tokio::time::sleep(delay).await;
            }
        }

        self.delivered.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// A template directory holding `welcome.hbs`, and `digest.hbs` with its
/// `digest.txt.hbs` plain-text alternative
pub fn templates() -> (TempDir, TemplateStore) {
    let dir = TempDir::new().unwrap();
    for (file, source) in [
        (
            "welcome.hbs",
            "<p>Welcome {{name}}, your project is {{project.title}}</p>",
        ),
        (
            "digest.hbs",
            "<ul>{{#each projects}}<li>{{this}}</li>{{/each}}</ul>",
        ),
        (
            "digest.txt.hbs",
            "Projects: {{#each projects}}{{#unless @first}}, {{/unless}}{{this}}{{/each}}",
        ),
    ] {
        std::fs::write(dir.path().join(file), source).unwrap();
    }

    let store = TemplateStore::new(dir.path());
    (dir, store)
}

pub fn sender() -> Sender {
    Sender::new("projects@example.com").with_name("Projects")
}

/// Everything one dispatch test needs, sharing a single store
pub struct Harness {
    pub store: Arc<TestQueueStore>,
    pub transport: Arc<ScriptedTransport>,
    pub enqueuer: Enqueuer,
    pub dispatcher: Dispatcher,
    templates: TemplateStore,
    _dir: TempDir,
}

impl Harness {
    pub fn new(config: DispatcherConfig, script: Script) -> Self {
        let store = Arc::new(TestQueueStore::new());
        let transport = ScriptedTransport::new(script);
        let (dir, templates) = templates();

        let dispatcher = Dispatcher::new(
            config,
            store.clone(),
            transport.clone(),
            templates.clone(),
            &sender(),
        )
        .expect("valid dispatcher config");

        Self {
            enqueuer: Enqueuer::new(store.clone()),
            store,
            transport,
            dispatcher,
            templates,
            _dir: dir,
        }
    }

    /// A second dispatcher on the same store and transport
    pub fn another_dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.dispatcher.config().clone(),
            self.store.clone() as Arc<dyn QueueStore>,
            self.transport.clone(),
            self.templates.clone(),
            &sender(),
        )
        .expect("valid dispatcher config")
    }
}

/// Config for tests that drive ticks by hand
pub fn manual_config() -> DispatcherConfig {
    DispatcherConfig {
        interval_secs: 3600,
        ..DispatcherConfig::default()
    }
}
