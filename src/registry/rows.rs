//! Typed Registry rows and write-back payloads.
//!
//! Rows are parsed leniently from `FieldMap`s at the adapter boundary;
//! eligibility is then re-checked in process with a human-readable skip
//! reason, so a half-filled row never reaches the send path silently.

use chrono::{DateTime, Utc};

use crate::classify::Classification;
use crate::registry::value::{FieldMap, FieldValue};

/// Outreach Record field names.
pub mod field {
    pub const RECIPIENT: &str = "Recipient";
    pub const SUBJECT: &str = "Subject";
    pub const BODY: &str = "Body";
    pub const SENDER: &str = "Sender";
    pub const STAGE: &str = "Stage";
    pub const STATUS: &str = "Status";
    pub const THREAD_ID: &str = "Thread ID";
    pub const MESSAGE_ID_LAST: &str = "Message ID Last";
    pub const SENT_AT_LAST: &str = "Sent At Last";
    pub const SUBJECT_LAST: &str = "Subject Last";
    pub const QUEUED_AT: &str = "Queued At";
    pub const PLANNED_SEND_AT: &str = "Planned Send At";
    pub const STOPPED: &str = "Stopped";
    pub const UNSUBSCRIBED: &str = "Unsubscribed";
    pub const BOUNCED: &str = "Bounced";
    pub const NEEDS_REVIEW: &str = "Needs Review";
    pub const STOP_REASON: &str = "Stop Reason";
    pub const BOUNCE_TYPE: &str = "Bounce Type";
    pub const LAST_INBOUND_AT: &str = "Last Inbound At";
}

/// Inbound Message field names.
pub mod inbound_field {
    pub const TITLE: &str = "Title";
    pub const MESSAGE_ID: &str = "Message ID";
    pub const THREAD_ID: &str = "Thread ID";
    pub const DIRECTION: &str = "Direction";
    pub const FROM: &str = "From";
    pub const TO: &str = "To";
    pub const RECEIVED_AT: &str = "Received At";
    pub const SUBJECT: &str = "Subject";
    pub const BODY: &str = "Body";
    pub const SNIPPET: &str = "Snippet";
    pub const RUN_ID: &str = "Run ID";
    pub const CLASSIFICATION: &str = "Classification";
    pub const NEEDS_REVIEW: &str = "Needs Review";
    pub const RECORD: &str = "Record";
    pub const AUTO_RESPONSE_SUPPRESS: &str = "Auto Response Suppress";
    pub const BULK_PRECEDENCE: &str = "Bulk Precedence";
}

/// Stop Reason text is capped to stay inside the store's text limits.
pub const STOP_REASON_MAX_CHARS: usize = 2000;

// ── Outreach Record ─────────────────────────────────────────────────

/// Lifecycle status of an Outreach Record. `Pending` is the only value
/// the scheduler ever selects; `Replied` and `Stopped` are written by
/// the inbound pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Done,
    Replied,
    Stopped,
    Other(String),
}

impl RecordStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Done" => Self::Done,
            "Replied" => Self::Replied,
            "Stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Done => "Done",
            Self::Replied => "Replied",
            Self::Stopped => "Stopped",
            Self::Other(s) => s,
        }
    }
}

/// One planned/sent touch in an outreach sequence.
#[derive(Debug, Clone)]
pub struct OutreachRecord {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sender_account: String,
    pub stage: String,
    pub status: RecordStatus,
    pub thread_id: Option<String>,
    pub message_id_last: Option<String>,
    pub sent_at_last: Option<DateTime<Utc>>,
    pub stopped: bool,
    pub unsubscribed: bool,
    pub bounced: bool,
    pub needs_review: bool,
}

fn text_of(fields: &FieldMap, name: &str) -> String {
    fields
        .get(name)
        .and_then(FieldValue::as_text)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn optional_text(fields: &FieldMap, name: &str) -> Option<String> {
    let value = text_of(fields, name);
    if value.is_empty() { None } else { Some(value) }
}

fn checkbox_of(fields: &FieldMap, name: &str) -> bool {
    fields
        .get(name)
        .and_then(FieldValue::as_checkbox)
        .unwrap_or(false)
}

impl OutreachRecord {
    /// Parse a record from its field map. Absent fields default to the
    /// empty/false state; validation happens separately so the caller
    /// can log why a row was skipped.
    pub fn from_fields(id: &str, fields: &FieldMap) -> Self {
        Self {
            id: id.to_string(),
            recipient: text_of(fields, field::RECIPIENT),
            subject: text_of(fields, field::SUBJECT),
            body: text_of(fields, field::BODY),
            sender_account: text_of(fields, field::SENDER),
            stage: fields
                .get(field::STAGE)
                .and_then(FieldValue::as_select_like)
                .unwrap_or_default()
                .to_string(),
            status: fields
                .get(field::STATUS)
                .and_then(FieldValue::as_select_like)
                .map(RecordStatus::parse)
                .unwrap_or(RecordStatus::Other(String::new())),
            thread_id: optional_text(fields, field::THREAD_ID),
            message_id_last: optional_text(fields, field::MESSAGE_ID_LAST),
            sent_at_last: fields
                .get(field::SENT_AT_LAST)
                .and_then(FieldValue::as_date),
            stopped: checkbox_of(fields, field::STOPPED),
            unsubscribed: checkbox_of(fields, field::UNSUBSCRIBED),
            bounced: checkbox_of(fields, field::BOUNCED),
            needs_review: checkbox_of(fields, field::NEEDS_REVIEW),
        }
    }

    /// Re-check eligibility in process. The Registry query already
    /// filters on these, but a row that slipped through (stale index,
    /// representation quirk) must not be sent. Returns the skip reason.
    pub fn validate_sendable(&self) -> Result<(), String> {
        if self.status != RecordStatus::Pending {
            return Err(format!("status is {} (want Pending)", self.status.as_str()));
        }
        if self.stopped || self.unsubscribed || self.bounced || self.needs_review {
            return Err("a stop/review flag is set".to_string());
        }
        let mut missing = Vec::new();
        if self.recipient.is_empty() {
            missing.push(field::RECIPIENT);
        }
        if self.subject.is_empty() {
            missing.push(field::SUBJECT);
        }
        if self.body.is_empty() {
            missing.push(field::BODY);
        }
        if !missing.is_empty() {
            return Err(format!("required fields empty: {}", missing.join(", ")));
        }
        Ok(())
    }

    /// A record with a thread id is sent as a followup in that thread.
    pub fn is_followup(&self) -> bool {
        self.thread_id.as_deref().is_some_and(|t| !t.is_empty())
    }
}

// ── Write-back payloads ─────────────────────────────────────────────

/// Successful send: Done + transport identifiers, review flag cleared.
#[derive(Debug, Clone)]
pub struct SentUpdate {
    pub sent_at: DateTime<Utc>,
    pub thread_id: String,
    pub message_id: String,
    pub subject_last: String,
}

impl SentUpdate {
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(
            field::STATUS.into(),
            FieldValue::Status("Done".to_string()),
        );
        fields.insert(
            field::SENT_AT_LAST.into(),
            FieldValue::Date(Some(self.sent_at)),
        );
        fields.insert(
            field::THREAD_ID.into(),
            FieldValue::Text(self.thread_id.clone()),
        );
        fields.insert(
            field::MESSAGE_ID_LAST.into(),
            FieldValue::Text(self.message_id.clone()),
        );
        fields.insert(
            field::SUBJECT_LAST.into(),
            FieldValue::Text(self.subject_last.clone()),
        );
        fields.insert(field::NEEDS_REVIEW.into(), FieldValue::Checkbox(false));
        fields
    }
}

/// Failed send: flagged for review, reason recorded, status back to
/// Pending. Permanent failures also set the stop flag.
#[derive(Debug, Clone)]
pub struct SendFailure {
    pub stop_reason: String,
    pub stopped: bool,
}

impl SendFailure {
    pub fn review(stop_reason: impl Into<String>) -> Self {
        Self {
            stop_reason: stop_reason.into(),
            stopped: false,
        }
    }

    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(field::NEEDS_REVIEW.into(), FieldValue::Checkbox(true));
        let mut reason = self.stop_reason.clone();
        if reason.len() > STOP_REASON_MAX_CHARS {
            let mut cut = STOP_REASON_MAX_CHARS;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        fields.insert(field::STOP_REASON.into(), FieldValue::Text(reason));
        fields.insert(
            field::STATUS.into(),
            FieldValue::Status("Pending".to_string()),
        );
        if self.stopped {
            fields.insert(field::STOPPED.into(), FieldValue::Checkbox(true));
        }
        fields
    }
}

/// Why a record was stop-lossed by the inbound pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Unsubscribe,
    BounceHard,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubscribe => "Unsubscribe",
            Self::BounceHard => "Bounce Hard",
        }
    }
}

/// Terminal stop-loss: the record must never be auto-selected again.
#[derive(Debug, Clone)]
pub struct StopUpdate {
    pub reason: StopReason,
    pub received_at: Option<DateTime<Utc>>,
}

impl StopUpdate {
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(field::STOPPED.into(), FieldValue::Checkbox(true));
        fields.insert(
            field::STOP_REASON.into(),
            FieldValue::Text(self.reason.as_str().to_string()),
        );
        fields.insert(
            field::STATUS.into(),
            FieldValue::Select("Stopped".to_string()),
        );
        fields.insert(field::PLANNED_SEND_AT.into(), FieldValue::Date(None));
        match self.reason {
            StopReason::Unsubscribe => {
                fields.insert(field::UNSUBSCRIBED.into(), FieldValue::Checkbox(true));
            }
            StopReason::BounceHard => {
                fields.insert(field::BOUNCED.into(), FieldValue::Checkbox(true));
            }
        }
        fields
    }
}

// ── Inbound Message ─────────────────────────────────────────────────

/// A classified inbound message ready to be recorded.
#[derive(Debug, Clone)]
pub struct InboundRow {
    pub title: String,
    pub message_id: String,
    pub thread_id: String,
    pub from_email: String,
    pub to_email: String,
    pub received_at: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    pub snippet: String,
    pub run_id: String,
    pub classification: Classification,
    pub needs_review: bool,
    pub record_id: Option<String>,
    pub auto_response_suppress: bool,
    pub bulk_precedence: bool,
}

impl InboundRow {
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(
            inbound_field::TITLE.into(),
            FieldValue::Title(self.title.clone()),
        );
        fields.insert(
            inbound_field::MESSAGE_ID.into(),
            FieldValue::Text(self.message_id.clone()),
        );
        fields.insert(
            inbound_field::THREAD_ID.into(),
            FieldValue::Text(self.thread_id.clone()),
        );
        fields.insert(
            inbound_field::DIRECTION.into(),
            FieldValue::Select("Inbound".to_string()),
        );
        fields.insert(
            inbound_field::FROM.into(),
            FieldValue::Email(self.from_email.clone()),
        );
        fields.insert(
            inbound_field::TO.into(),
            FieldValue::Email(self.to_email.clone()),
        );
        fields.insert(
            inbound_field::RECEIVED_AT.into(),
            FieldValue::Date(Some(self.received_at)),
        );
        fields.insert(
            inbound_field::SUBJECT.into(),
            FieldValue::Text(self.subject.clone()),
        );
        fields.insert(
            inbound_field::BODY.into(),
            FieldValue::Text(self.body.clone()),
        );
        fields.insert(
            inbound_field::SNIPPET.into(),
            FieldValue::Text(self.snippet.clone()),
        );
        fields.insert(
            inbound_field::RUN_ID.into(),
            FieldValue::Text(self.run_id.clone()),
        );
        fields.insert(
            inbound_field::CLASSIFICATION.into(),
            FieldValue::Select(self.classification.label().to_string()),
        );
        fields.insert(
            inbound_field::NEEDS_REVIEW.into(),
            FieldValue::Checkbox(self.needs_review),
        );
        fields.insert(
            inbound_field::AUTO_RESPONSE_SUPPRESS.into(),
            FieldValue::Checkbox(self.auto_response_suppress),
        );
        fields.insert(
            inbound_field::BULK_PRECEDENCE.into(),
            FieldValue::Checkbox(self.bulk_precedence),
        );
        if let Some(record_id) = &self.record_id {
            fields.insert(
                inbound_field::RECORD.into(),
                FieldValue::Relation(vec![record_id.clone()]),
            );
        }
        fields
    }
}
