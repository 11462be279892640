use crate::config::Config;
use crate::dns::MxResolver;
use crate::error::Rejection;
use crate::policy::Policy;
use crate::smtp::{Command, Envelope, Reply, Services, Session, SmtpCommandResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// Domains with MX records; `empty.example` resolves to nothing, anything else fails.
pub struct StubResolver;

#[async_trait]
impl MxResolver for StubResolver {
    async fn resolve_mx(&self, domain: &str) -> Result<Vec<String>> {
        match domain {
            "example.com" | "example.org" | "test.local" => Ok(vec![format!("mx.{}", domain)]),
            "empty.example" => Ok(Vec::new()),
            _ => Err(anyhow!("NXDOMAIN {}", domain)),
        }
    }
}

pub enum Delivery {
    Accept(Option<String>),
    Fail,
    FailWith(u16, &'static str),
}

impl Default for Delivery {
    fn default() -> Self {
        Delivery::Accept(None)
    }
}

/// A policy that records every hook call and refuses what it is told to.
#[derive(Default)]
pub struct RecordingPolicy {
    pub refused: Vec<String>,
    pub refusal_reply: Option<(u16, &'static str)>,
    pub credentials: Option<(String, String)>,
    pub delivery: Delivery,
    pub events: Mutex<Vec<String>>,
    pub body: Mutex<Vec<u8>>,
    pub recipient_sizes: Mutex<Vec<Option<usize>>>,
}

impl RecordingPolicy {
    pub fn with_credentials(username: &str, password: &str) -> Self {
        RecordingPolicy {
            credentials: Some((username.to_string(), password.to_string())),
            ..RecordingPolicy::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn body(&self) -> String {
        String::from_utf8(self.body.lock().unwrap().clone()).unwrap()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn check(&self, email: &str) -> Result<(), Rejection> {
        if !self.refused.iter().any(|refused| refused == email) {
            return Ok(());
        }
        Err(match self.refusal_reply {
            Some((code, text)) => Rejection::with_reply(code, text),
            None => Rejection::new(format!("{} refused", email)),
        })
    }
}

#[async_trait]
impl Policy for RecordingPolicy {
    async fn validate_sender(&self, _envelope: &Envelope, email: &str) -> Result<(), Rejection> {
        self.record(format!("sender {}", email));
        self.check(email)
    }

    async fn validate_recipient(&self, envelope: &Envelope, email: &str) -> Result<(), Rejection> {
        self.record(format!("recipient {}", email));
        self.recipient_sizes
            .lock()
            .unwrap()
            .push(envelope.message_size);
        self.check(email)
    }

    async fn authorize_user(
        &self,
        _envelope: &Envelope,
        username: &str,
        password: &str,
    ) -> Result<bool, Rejection> {
        self.record(format!("auth {}", username));
        Ok(matches!(
            &self.credentials,
            Some((u, p)) if u == username && p == password
        ))
    }

    async fn start_data(&self, envelope: &Envelope) {
        self.record(format!("start {}", envelope.to.join(",")));
    }

    async fn data(&self, _envelope: &Envelope, chunk: Bytes) {
        self.body.lock().unwrap().extend_from_slice(&chunk);
    }

    async fn abort_data(&self, envelope: &Envelope) {
        self.record(format!("abort {}", envelope.from.as_deref().unwrap_or("")));
    }

    async fn data_ready(&self, envelope: &Envelope) -> Result<Option<String>, Rejection> {
        self.record(format!("ready {}", envelope.from.as_deref().unwrap_or("")));
        match &self.delivery {
            Delivery::Accept(id) => Ok(id.clone()),
            Delivery::Fail => Err(Rejection::new("storage offline")),
            Delivery::FailWith(code, text) => Err(Rejection::with_reply(*code, *text)),
        }
    }
}

pub fn test_config() -> Config {
    Config {
        hostname: "mx.test".to_string(),
        banner: "ESMTP test".to_string(),
        ..Config::default()
    }
}

pub fn new_session(config: Config, policy: Arc<RecordingPolicy>, secure: bool) -> Session {
    let services = Services::new(policy, Arc::new(StubResolver));
    Session::new(Arc::new(config), services, "192.0.2.7", secure)
}

pub async fn send(session: &mut Session, line: &str) -> SmtpCommandResult {
    session.handle_command(&Command::parse(line)).await
}

pub async fn reply(session: &mut Session, line: &str) -> Reply {
    send(session, line).await.reply().clone()
}

pub async fn expect_code(session: &mut Session, line: &str, code: u16) -> Reply {
    let reply = reply(session, line).await;
    assert_eq!(reply.code(), code, "unexpected reply to {:?}: {}", line, reply);
    reply
}
