//! A one-callback server: collect each message whole, then accept or reject it.
//!
//! [`SimplePolicy`] implements [`Policy`] by buffering the body of every
//! message per connection and handing the finished [`ReceivedMessage`] to a
//! single [`MessageHandler`]. Address checks and authentication keep the
//! default hook behavior.
//!
//! ```no_run
//! use mail_warden::error::Rejection;
//! use mail_warden::simple::{self, ReceivedMessage};
//!
//! let policy = simple::from_fn(|message: ReceivedMessage| async move {
//!     if message.body.len() > 1_000_000 {
//!         return Err(Rejection::new("too large"));
//!     }
//!     Ok(None)
//! });
//! let config = simple::config();
//! # let _ = (policy, config);
//! ```

use crate::config::Config;
use crate::error::Rejection;
use crate::policy::Policy;
use crate::smtp::Envelope;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use uuid::Uuid;

/// A complete message as delivered to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub envelope: Envelope,
    /// The dot-unstuffed body, CRLF line endings included.
    pub body: Bytes,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Accepts with an optional queue id, or rejects the message.
    async fn handle(&self, message: ReceivedMessage) -> Result<Option<String>, Rejection>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, Rejection>> + Send + 'static,
{
    async fn handle(&self, message: ReceivedMessage) -> Result<Option<String>, Rejection> {
        (self)(message).await
    }
}

pub struct SimplePolicy<H> {
    handler: H,
    // In-progress bodies keyed by connection id.
    bodies: Mutex<HashMap<Uuid, BytesMut>>,
}

impl<H: MessageHandler> SimplePolicy<H> {
    pub fn new(handler: H) -> Self {
        SimplePolicy {
            handler,
            bodies: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.with_bodies(|bodies| bodies.len())
    }

    fn with_bodies<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, BytesMut>) -> T) -> T {
        let mut bodies = match self.bodies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut bodies)
    }
}

/// Wraps an async closure as the message handler.
pub fn from_fn<F, Fut>(handler: F) -> SimplePolicy<F>
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, Rejection>> + Send + 'static,
{
    SimplePolicy::new(handler)
}

/// Server configuration matching the simple wrapper's relaxed defaults:
/// plaintext transactions are allowed and no MX lookups are made.
pub fn config() -> Config {
    Config {
        ignore_tls: true,
        disable_dns_validation: true,
        ..Config::default()
    }
}

#[async_trait]
impl<H: MessageHandler> Policy for SimplePolicy<H> {
    async fn start_data(&self, envelope: &Envelope) {
        debug!("Buffering message on connection {}", envelope.id);
        self.with_bodies(|bodies| bodies.insert(envelope.id, BytesMut::new()));
    }

    async fn data(&self, envelope: &Envelope, chunk: Bytes) {
        self.with_bodies(|bodies| {
            bodies
                .entry(envelope.id)
                .or_default()
                .extend_from_slice(&chunk)
        });
    }

    async fn data_ready(&self, envelope: &Envelope) -> Result<Option<String>, Rejection> {
        let body = self
            .with_bodies(|bodies| bodies.remove(&envelope.id))
            .unwrap_or_default()
            .freeze();

        let message = ReceivedMessage {
            envelope: envelope.clone(),
            body,
        };
        match self.handler.handle(message).await {
            Ok(queue_id) => {
                let queue_id = queue_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                info!("Accepted message on connection {} as {}", envelope.id, queue_id);
                Ok(Some(queue_id))
            }
            Err(rejection) => {
                warn!("Rejected message on connection {}: {}", envelope.id, rejection);
                Err(rejection)
            }
        }
    }

    async fn abort_data(&self, envelope: &Envelope) {
        if self.with_bodies(|bodies| bodies.remove(&envelope.id)).is_some() {
            debug!("Discarded partial message on connection {}", envelope.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn envelope() -> Envelope {
        let mut envelope = Envelope::new("192.0.2.1");
        envelope.from = Some("a@example.com".to_string());
        envelope.add_recipient("b@example.com".to_string());
        envelope
    }

    #[test]
    fn test_config_relaxes_tls_and_dns() {
        let config = config();
        assert!(config.ignore_tls);
        assert!(config.disable_dns_validation);
        assert!(!config.require_authentication);
    }

    #[tokio::test]
    async fn test_body_is_collected_per_connection() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy = from_fn(move |message: ReceivedMessage| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(message);
                Ok(Some("Q1".to_string()))
            }
        });

        let first = envelope();
        let second = envelope();
        policy.start_data(&first).await;
        policy.start_data(&second).await;
        policy.data(&first, Bytes::from_static(b"one\r\n")).await;
        policy.data(&second, Bytes::from_static(b"two\r\n")).await;
        policy.data(&first, Bytes::from_static(b"more\r\n")).await;

        assert_eq!(policy.data_ready(&first).await.unwrap(), Some("Q1".to_string()));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body, Bytes::from_static(b"one\r\nmore\r\n"));
        assert_eq!(seen[0].envelope.to, vec!["b@example.com".to_string()]);
        drop(seen);

        assert!(policy.bodies.lock().unwrap().contains_key(&second.id));
        assert!(!policy.bodies.lock().unwrap().contains_key(&first.id));
    }

    #[tokio::test]
    async fn test_aborted_body_is_discarded() {
        let policy = from_fn(|_message: ReceivedMessage| async { Ok(None) });
        let envelope = envelope();
        policy.start_data(&envelope).await;
        policy.data(&envelope, Bytes::from_static(b"partial\r\n")).await;
        policy.abort_data(&envelope).await;
        assert!(policy.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accept_without_id_gets_a_uuid() {
        let policy = from_fn(|_message: ReceivedMessage| async { Ok(None) });
        let envelope = envelope();
        policy.start_data(&envelope).await;
        let id = policy.data_ready(&envelope).await.unwrap().unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_rejection_is_passed_through() {
        let policy = from_fn(|_message: ReceivedMessage| async {
            Err(Rejection::with_reply(554, "5.6.0 Message refused"))
        });
        let envelope = envelope();
        policy.start_data(&envelope).await;
        let rejection = policy.data_ready(&envelope).await.unwrap_err();
        assert_eq!(rejection.reply().map(|r| r.code()), Some(554));
    }
}
