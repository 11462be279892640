//! The hooks an application registers to decide what the server accepts.
//!
//! Every hook receives the current [`Envelope`] by reference and is awaited by
//! the session before it answers the client, so a slow hook delays only its own
//! connection. All hooks have permissive defaults except `authorize_user`,
//! which refuses everyone unless overridden.

use crate::config::Config;
use crate::error::Rejection;
use crate::smtp::Envelope;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait Policy: Send + Sync {
    /// Called for `MAIL FROM` when sender validation is enabled.
    async fn validate_sender(&self, _envelope: &Envelope, _email: &str) -> Result<(), Rejection> {
        Ok(())
    }

    /// Called for `RCPT TO` when recipient validation is enabled.
    ///
    /// `envelope.message_size` holds the client's `SIZE=` declaration, if any.
    async fn validate_recipient(
        &self,
        _envelope: &Envelope,
        _email: &str,
    ) -> Result<(), Rejection> {
        Ok(())
    }

    /// Checks credentials from `AUTH PLAIN` or `AUTH LOGIN`.
    async fn authorize_user(
        &self,
        _envelope: &Envelope,
        _username: &str,
        _password: &str,
    ) -> Result<bool, Rejection> {
        Ok(false)
    }

    /// Fired once per message, after `354` and before any body bytes.
    async fn start_data(&self, _envelope: &Envelope) {}

    /// Fired for every chunk of the (dot-unstuffed) message body.
    async fn data(&self, _envelope: &Envelope, _chunk: Bytes) {}

    /// Fired when the body is complete. `Ok(Some(id))` is reported as the queue id.
    async fn data_ready(&self, _envelope: &Envelope) -> Result<Option<String>, Rejection> {
        Ok(None)
    }

    /// Fired instead of `data_ready` when the connection ends mid-body
    /// (EOF, timeout or transport error). The partial message is discarded.
    async fn abort_data(&self, _envelope: &Envelope) {}
}

/// The policy used by the standalone binary: accepts every message, logs its
/// envelope, and authorizes only the credentials from the configuration.
pub struct LoggingPolicy {
    username: Option<String>,
    password: Option<String>,
    // Body bytes received so far, keyed by connection id.
    received: Mutex<HashMap<Uuid, usize>>,
}

impl LoggingPolicy {
    pub fn new(config: &Config) -> Self {
        Self {
            username: config.auth_username.clone(),
            password: config.auth_password.clone(),
            received: Mutex::new(HashMap::new()),
        }
    }

    fn with_received<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, usize>) -> T) -> T {
        let mut received = match self.received.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut received)
    }
}

#[async_trait]
impl Policy for LoggingPolicy {
    async fn authorize_user(
        &self,
        envelope: &Envelope,
        username: &str,
        password: &str,
    ) -> Result<bool, Rejection> {
        let granted = matches!(
            (&self.username, &self.password),
            (Some(u), Some(p)) if u == username && p == password
        );
        info!(
            "Authorization for '{}' from {}: {}",
            username,
            envelope.remote_address,
            if granted { "granted" } else { "denied" }
        );
        Ok(granted)
    }

    async fn start_data(&self, envelope: &Envelope) {
        self.with_received(|received| received.insert(envelope.id, 0));
        info!(
            "Receiving message from {} ({}) for {}",
            envelope.from.as_deref().unwrap_or("<>"),
            envelope.remote_address,
            envelope.to.join(", ")
        );
    }

    async fn data(&self, envelope: &Envelope, chunk: Bytes) {
        self.with_received(|received| *received.entry(envelope.id).or_default() += chunk.len());
    }

    async fn data_ready(&self, envelope: &Envelope) -> Result<Option<String>, Rejection> {
        let size = self
            .with_received(|received| received.remove(&envelope.id))
            .unwrap_or_default();
        info!(
            "Delivered message by {} to {}, sent from {} ({}), {} bytes",
            envelope.from.as_deref().unwrap_or("<>"),
            envelope.to.join(", "),
            envelope.host.as_deref().unwrap_or("unknown"),
            envelope.remote_address,
            size
        );
        Ok(None)
    }

    async fn abort_data(&self, envelope: &Envelope) {
        let size = self.with_received(|received| received.remove(&envelope.id));
        debug!(
            "Dropped partial message from {} after {} bytes",
            envelope.remote_address,
            size.unwrap_or_default()
        );
    }
}
