//! Error types shared between the transport channel, the session and the policy hooks.

use crate::smtp::Reply;
use thiserror::Error;

/// Failures of the underlying line-oriented channel.
///
/// Every variant is fatal for the connection: the session answers with a `421`
/// and the channel is closed.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("timed out waiting for client input")]
    Timeout,

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A refusal reported by a [`Policy`](crate::policy::Policy) hook.
///
/// By default the session answers with the stock response for the hook that
/// refused (`550` for address checks, `535` for credentials, `550 FAILED` for
/// message delivery). A rejection built with [`Rejection::with_reply`] overrides
/// that line, e.g. to report `452 Insufficient channel storage`.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct Rejection {
    reason: String,
    reply: Option<Reply>,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            reply: None,
        }
    }

    /// Rejects with a caller-chosen status line sent verbatim to the client.
    pub fn with_reply(code: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            reason: text.clone(),
            reply: Some(Reply::new(code, text)),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }
}
