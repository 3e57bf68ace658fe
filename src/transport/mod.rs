//! Mail transport seam — pure I/O, no lifecycle logic.
//!
//! The engine talks to one mailbox at a time through `MailTransport`;
//! `MailboxConnector` turns a sender credential into a transport. Both
//! are trait objects so tests can substitute scripted fakes.

pub mod gmail;
pub mod parse;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TransportError;
use crate::registry::SenderCredential;

pub use gmail::{GmailConnector, GmailTransport};

/// An outbound message, authored as plain text. Cold sends leave
/// `thread_id`/`in_reply_to` empty; followups set both.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    /// Prior message id, placed in `In-Reply-To`/`References`.
    pub in_reply_to: Option<String>,
}

/// Identifiers returned by the provider after a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub thread_id: String,
}

/// A listed inbox entry; full content requires a separate fetch.
#[derive(Debug, Clone)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// A fetched inbound message, normalized for classification and routing.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub thread_id: String,
    /// Raw `From` header value, trimmed.
    pub from_email: String,
    /// `Delivered-To` when present, else `To`.
    pub to_email: String,
    pub received_at: DateTime<Utc>,
    pub subject: String,
    pub snippet: String,
    /// Plain-text body, possibly truncated head+tail.
    pub body_plain: String,
    /// Raw `Auto-Submitted` header value.
    pub auto_submitted: Option<String>,
    /// Lower-cased `Precedence` header value.
    pub precedence: Option<String>,
    pub is_mailer_daemon: bool,
    pub has_multipart_report: bool,
    /// `X-Auto-Response-Suppress` present. Recorded only.
    pub has_auto_response_suppress: bool,
}

impl ParsedMessage {
    /// Minimal message for tests; real messages come from `parse`.
    pub fn for_tests(from: &str, subject: &str, body: &str) -> Self {
        Self {
            message_id: "msg-test".into(),
            thread_id: "thr-test".into(),
            from_email: from.into(),
            to_email: "me@example.com".into(),
            received_at: Utc::now(),
            subject: subject.into(),
            snippet: body.chars().take(80).collect(),
            body_plain: body.into(),
            auto_submitted: None,
            precedence: None,
            is_mailer_daemon: false,
            has_multipart_report: false,
            has_auto_response_suppress: false,
        }
    }
}

/// Authenticated operations against a single mailbox.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send a message. Followups (thread id + prior message id present)
    /// are threaded by the provider.
    async fn send(&self, mail: &OutgoingMail) -> Result<SendReceipt, TransportError>;

    /// List recent inbox messages (excluding sent mail), newest first.
    async fn list_inbox(&self, max_results: usize) -> Result<Vec<MessageRef>, TransportError>;

    /// Fetch and parse one message. `None` when the provider returns an
    /// unparseable or vanished message.
    async fn fetch(
        &self,
        message_id: &str,
        body_max_chars: usize,
    ) -> Result<Option<ParsedMessage>, TransportError>;
}

/// Builds a transport for a sender credential.
pub trait MailboxConnector: Send + Sync {
    fn connect(&self, credential: &SenderCredential)
    -> Result<Arc<dyn MailTransport>, TransportError>;
}
