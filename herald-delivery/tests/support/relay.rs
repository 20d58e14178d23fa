//! Minimal scripted SMTP relay for exercising the real transport
//!
//! Speaks just enough of RFC 5321 for a plaintext client: greeting, EHLO,
//! MAIL, RCPT, DATA, RSET, NOOP and QUIT. Every reply can be overridden so
//! tests can provoke 4xx and 5xx answers at any stage.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn line(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.text).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Replies {
    greeting: Reply,
    ehlo: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    message: Reply,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "relay.test ESMTP ready"),
            ehlo: Reply::new(250, "relay.test"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            message: Reply::new(250, "OK: queued"),
        }
    }
}

/// What the relay saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Message(String),
    Other(String),
}

pub struct MockRelay {
    addr: SocketAddr,
    received: Arc<RwLock<Vec<Received>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockRelay {
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            replies: Replies::default(),
        }
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.read().await.clone()
    }

    /// Bodies of every message accepted by DATA
    pub async fn messages(&self) -> Vec<String> {
        self.received
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                Received::Message(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    async fn session(
        mut stream: TcpStream,
        replies: Arc<Replies>,
        received: Arc<RwLock<Vec<Received>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&replies.greeting.line()).await?;

        loop {
            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let command = line.trim_end().to_string();
            let (verb, argument) = command.split_once(' ').unwrap_or((command.as_str(), ""));

            let (reply, seen) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" | "HELO" => (&replies.ehlo, Received::Ehlo(argument.to_string())),
                "MAIL" => (&replies.mail_from, Received::MailFrom(argument.to_string())),
                "RCPT" => (&replies.rcpt_to, Received::RcptTo(argument.to_string())),
                "QUIT" => {
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                "DATA" => {
                    writer.write_all(&replies.data.line()).await?;
                    if replies.data.code != 354 {
                        continue;
                    }

                    let mut body = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line.trim_end() == "." {
                            break;
                        }
                        body.push_str(&line);
                    }

                    received.write().await.push(Received::Message(body));
                    writer.write_all(&replies.message.line()).await?;
                    continue;
                }
                _ => {
                    received.write().await.push(Received::Other(command.clone()));
                    writer.write_all(b"250 OK\r\n").await?;
                    continue;
                }
            };

            received.write().await.push(seen);
            writer.write_all(&reply.line()).await?;
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

pub struct MockRelayBuilder {
    replies: Replies,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn with_rcpt_to_reply(mut self, code: u16, text: &str) -> Self {
        self.replies.rcpt_to = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_mail_from_reply(mut self, code: u16, text: &str) -> Self {
        self.replies.mail_from = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn with_message_reply(mut self, code: u16, text: &str) -> Self {
        self.replies.message = Reply::new(code, text);
        self
    }

    /// Bind to an ephemeral local port and start accepting sessions
    pub async fn start(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let replies = Arc::new(self.replies);
        let received = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let task_received = Arc::clone(&received);
        let task_shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            while !task_shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                let replies = Arc::clone(&replies);
                let received = Arc::clone(&task_received);
                tokio::spawn(async move {
                    if let Err(e) = MockRelay::session(stream, replies, received).await {
                        tracing::debug!("Mock relay session error: {e}");
                    }
                });
            }
        });

        Ok(MockRelay {
            addr,
            received,
            shutdown,
        })
    }
}
