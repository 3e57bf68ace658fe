//! Registry seam — the document store holding outreach state.
//!
//! The engine persists three row kinds: Outreach Records (queue and
//! touchpoint, same physical row), Inbound Messages, and Sender
//! Credentials. The trait is domain-shaped; the HTTP client behind it
//! deals with the store's dynamically-shaped field values and the
//! select/status representation split.

pub mod client;
pub mod rows;
pub mod value;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::RegistryError;

pub use client::HttpRegistry;
pub use rows::{
    InboundRow, OutreachRecord, RecordStatus, SendFailure, SentUpdate, StopReason, StopUpdate,
};
pub use value::{FieldMap, FieldValue};

/// A sender identity resolved to its renewable mail-API credential.
#[derive(Clone)]
pub struct SenderCredential {
    pub email: String,
    pub secret: SecretString,
}

/// Persistence operations used by the scheduler and the inbound pipeline.
#[async_trait]
pub trait Registry: Send + Sync {
    /// All currently sendable Outreach Records: status Pending, all four
    /// flags false, recipient/subject/body non-empty — sorted by queue
    /// order. Any "planned send at" hint is ignored; pacing belongs to
    /// the Throttle Ledger.
    async fn query_sendable(
        &self,
        collection_id: &str,
        batch_size: usize,
    ) -> Result<Vec<OutreachRecord>, RegistryError>;

    /// Ids of Outreach Records whose thread id equals `thread_id`.
    async fn find_record_ids_by_thread(
        &self,
        collection_id: &str,
        thread_id: &str,
    ) -> Result<Vec<String>, RegistryError>;

    /// Idempotency guard: is there an Inbound Message row for this mail
    /// message id already?
    async fn inbound_exists(
        &self,
        collection_id: &str,
        message_id: &str,
    ) -> Result<bool, RegistryError>;

    /// Record a classified inbound message. Returns the new row id.
    async fn create_inbound(
        &self,
        collection_id: &str,
        row: &InboundRow,
    ) -> Result<String, RegistryError>;

    /// Successful send write-back: Done + transport identifiers.
    async fn mark_sent(&self, record_id: &str, update: &SentUpdate) -> Result<(), RegistryError>;

    /// Failed send write-back: needs-review, stop reason, optional stop.
    async fn mark_send_failure(
        &self,
        record_id: &str,
        failure: &SendFailure,
    ) -> Result<(), RegistryError>;

    /// Terminal stop-loss (unsubscribe / hard bounce).
    async fn mark_stopped(&self, record_id: &str, stop: &StopUpdate) -> Result<(), RegistryError>;

    /// Non-terminal reply: status Replied, so the scheduler stops
    /// selecting the record without closing it.
    async fn mark_replied(&self, record_id: &str) -> Result<(), RegistryError>;

    /// Look up a sender credential by account email.
    async fn find_sender_credential(
        &self,
        collection_id: &str,
        account: &str,
    ) -> Result<Option<SenderCredential>, RegistryError>;
}
