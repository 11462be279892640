//! The per-transaction envelope.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Sender, recipients and metadata for one message transaction.
///
/// An envelope is owned by its connection and replaced on `RSET` and after each
/// delivered message. The connection-level metadata (`id`, `remote_address`,
/// `host`) carries over into the replacement; the transaction fields start empty.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Identifies the connection; stable across envelope resets.
    pub id: Uuid,
    pub remote_address: String,
    /// The name the client announced with HELO/EHLO.
    pub host: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    /// Size the client declared with the `SIZE=` parameter of `MAIL`.
    pub message_size: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(remote_address: impl Into<String>) -> Self {
        Envelope {
            id: Uuid::new_v4(),
            remote_address: remote_address.into(),
            host: None,
            from: None,
            to: Vec::new(),
            message_size: None,
            created_at: Utc::now(),
        }
    }

    /// Starts a fresh transaction on the same connection.
    pub fn renew(&self) -> Self {
        Envelope {
            id: self.id,
            remote_address: self.remote_address.clone(),
            host: self.host.clone(),
            from: None,
            to: Vec::new(),
            message_size: None,
            created_at: Utc::now(),
        }
    }

    /// Adds a recipient unless it is already present. Returns whether it was added.
    pub fn add_recipient(&mut self, email: String) -> bool {
        if self.to.contains(&email) {
            return false;
        }
        self.to.push(email);
        true
    }

    pub fn has_sender(&self) -> bool {
        self.from.is_some()
    }

    pub fn has_recipients(&self) -> bool {
        !self.to.is_empty()
    }
}
