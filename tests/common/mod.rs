//! Shared test harness: an in-memory Registry and a scripted mail
//! transport, both behind the production trait seams.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use uuid::Uuid;

use outreach::config::{GroupsConfig, MailboxGroup};
use outreach::error::{RegistryError, TransportError};
use outreach::registry::rows::field;
use outreach::registry::value::{FieldMap, FieldValue};
use outreach::registry::{
    InboundRow, OutreachRecord, Registry, SendFailure, SenderCredential, SentUpdate, StopUpdate,
};
use outreach::transport::{
    MailTransport, MailboxConnector, MessageRef, OutgoingMail, ParsedMessage, SendReceipt,
};

// ── Builders ────────────────────────────────────────────────────────

/// Field map for a sendable Outreach Record.
pub fn sendable_record(recipient: &str, subject: &str, body: &str, sender: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert(field::RECIPIENT.into(), FieldValue::Email(recipient.into()));
    fields.insert(field::SUBJECT.into(), FieldValue::Text(subject.into()));
    fields.insert(field::BODY.into(), FieldValue::Text(body.into()));
    fields.insert(field::SENDER.into(), FieldValue::Text(sender.into()));
    fields.insert(field::STATUS.into(), FieldValue::Select("Pending".into()));
    fields.insert(field::STOPPED.into(), FieldValue::Checkbox(false));
    fields.insert(field::UNSUBSCRIBED.into(), FieldValue::Checkbox(false));
    fields.insert(field::BOUNCED.into(), FieldValue::Checkbox(false));
    fields.insert(field::NEEDS_REVIEW.into(), FieldValue::Checkbox(false));
    fields
}

/// A one-group configuration over the given mailboxes.
pub fn single_group_config(mailboxes: &[&str]) -> GroupsConfig {
    GroupsConfig {
        groups: vec![group("records", "inbound", "senders", mailboxes)],
        poll_interval_seconds: 120,
        body_max_chars: 40_000,
        batch_size: 100,
    }
}

pub fn group(records: &str, inbound: &str, senders: &str, mailboxes: &[&str]) -> MailboxGroup {
    MailboxGroup {
        records_collection_id: records.into(),
        inbound_collection_id: inbound.into(),
        senders_collection_id: senders.into(),
        mailboxes: mailboxes.iter().map(|s| s.to_string()).collect(),
    }
}

// ── In-memory Registry ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRegistry {
    /// collection id → rows in queue order.
    records: Mutex<HashMap<String, Vec<(String, FieldMap)>>>,
    /// (collection id, row id, fields).
    inbound: Mutex<Vec<(String, String, FieldMap)>>,
    /// account email → credential.
    credentials: Mutex<HashMap<String, SenderCredential>>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_record(&self, collection: &str, id: &str, fields: FieldMap) {
        self.records
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push((id.to_string(), fields));
    }

    pub fn add_credential(&self, account: &str, secret: &str) {
        self.credentials.lock().unwrap().insert(
            account.to_string(),
            SenderCredential {
                email: account.to_string(),
                secret: SecretString::from(secret.to_string()),
            },
        );
    }

    /// Parse a stored record by id, wherever it lives.
    pub fn record(&self, id: &str) -> OutreachRecord {
        let records = self.records.lock().unwrap();
        for rows in records.values() {
            if let Some((row_id, fields)) = rows.iter().find(|(row_id, _)| row_id == id) {
                return OutreachRecord::from_fields(row_id, fields);
            }
        }
        panic!("record {id} not found");
    }

    /// Raw field access for assertions on columns the typed record
    /// does not carry (e.g. Planned Send At).
    pub fn record_field(&self, id: &str, name: &str) -> Option<FieldValue> {
        let records = self.records.lock().unwrap();
        for rows in records.values() {
            if let Some((_, fields)) = rows.iter().find(|(row_id, _)| row_id == id) {
                return fields.get(name).cloned();
            }
        }
        None
    }

    pub fn inbound_rows(&self, collection: &str) -> Vec<FieldMap> {
        self.inbound
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| c == collection)
            .map(|(_, _, fields)| fields.clone())
            .collect()
    }

    fn merge_into_record(&self, record_id: &str, updates: FieldMap) -> Result<(), RegistryError> {
        let mut records = self.records.lock().unwrap();
        for rows in records.values_mut() {
            if let Some((_, fields)) = rows.iter_mut().find(|(row_id, _)| row_id == record_id) {
                for (name, value) in updates {
                    fields.insert(name, value);
                }
                return Ok(());
            }
        }
        Err(RegistryError::Http {
            status: 404,
            message: format!("row {record_id} not found"),
        })
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn query_sendable(
        &self,
        collection_id: &str,
        batch_size: usize,
    ) -> Result<Vec<OutreachRecord>, RegistryError> {
        let records = self.records.lock().unwrap();
        let rows = records.get(collection_id).cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|(id, fields)| OutreachRecord::from_fields(id, fields))
            .filter(|record| record.validate_sendable().is_ok())
            .take(batch_size.clamp(1, 100))
            .collect())
    }

    async fn find_record_ids_by_thread(
        &self,
        collection_id: &str,
        thread_id: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let records = self.records.lock().unwrap();
        let rows = records.get(collection_id).cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|(_, fields)| {
                fields
                    .get(field::THREAD_ID)
                    .and_then(FieldValue::as_text)
                    .is_some_and(|t| t == thread_id)
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn inbound_exists(
        &self,
        collection_id: &str,
        message_id: &str,
    ) -> Result<bool, RegistryError> {
        use outreach::registry::rows::inbound_field;
        Ok(self.inbound.lock().unwrap().iter().any(|(c, _, fields)| {
            c == collection_id
                && fields
                    .get(inbound_field::MESSAGE_ID)
                    .and_then(FieldValue::as_text)
                    .is_some_and(|m| m == message_id)
        }))
    }

    async fn create_inbound(
        &self,
        collection_id: &str,
        row: &InboundRow,
    ) -> Result<String, RegistryError> {
        let id = Uuid::new_v4().to_string();
        self.inbound
            .lock()
            .unwrap()
            .push((collection_id.to_string(), id.clone(), row.to_fields()));
        Ok(id)
    }

    async fn mark_sent(&self, record_id: &str, update: &SentUpdate) -> Result<(), RegistryError> {
        self.merge_into_record(record_id, update.to_fields())
    }

    async fn mark_send_failure(
        &self,
        record_id: &str,
        failure: &SendFailure,
    ) -> Result<(), RegistryError> {
        self.merge_into_record(record_id, failure.to_fields())
    }

    async fn mark_stopped(&self, record_id: &str, stop: &StopUpdate) -> Result<(), RegistryError> {
        let mut fields = stop.to_fields();
        if let Some(received_at) = stop.received_at {
            fields.insert(
                field::LAST_INBOUND_AT.into(),
                FieldValue::Date(Some(received_at)),
            );
        }
        self.merge_into_record(record_id, fields)
    }

    async fn mark_replied(&self, record_id: &str) -> Result<(), RegistryError> {
        let mut fields = FieldMap::new();
        fields.insert(field::STATUS.into(), FieldValue::Select("Replied".into()));
        self.merge_into_record(record_id, fields)
    }

    async fn find_sender_credential(
        &self,
        _collection_id: &str,
        account: &str,
    ) -> Result<Option<SenderCredential>, RegistryError> {
        Ok(self.credentials.lock().unwrap().get(account.trim()).cloned())
    }
}

// ── Scripted transport ──────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedTransport {
    pub sent: Mutex<Vec<OutgoingMail>>,
    /// Pre-scripted send outcomes, consumed in order. When empty, sends
    /// succeed with generated identifiers.
    pub send_script: Mutex<VecDeque<Result<SendReceipt, TransportError>>>,
    pub inbox: Mutex<Vec<ParsedMessage>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_send_error(&self, error: TransportError) {
        self.send_script.lock().unwrap().push_back(Err(error));
    }

    pub fn push_inbox(&self, message: ParsedMessage) {
        self.inbox.lock().unwrap().push(message);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<SendReceipt, TransportError> {
        let scripted = self.send_script.lock().unwrap().pop_front();
        if let Some(result) = scripted {
            if result.is_ok() {
                self.sent.lock().unwrap().push(mail.clone());
            }
            return result;
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(mail.clone());
        let n = sent.len();
        Ok(SendReceipt {
            message_id: format!("msg-{n}"),
            thread_id: mail
                .thread_id
                .clone()
                .unwrap_or_else(|| format!("thr-{n}")),
        })
    }

    async fn list_inbox(&self, max_results: usize) -> Result<Vec<MessageRef>, TransportError> {
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .take(max_results)
            .map(|m| MessageRef {
                id: m.message_id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    async fn fetch(
        &self,
        message_id: &str,
        _body_max_chars: usize,
    ) -> Result<Option<ParsedMessage>, TransportError> {
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned())
    }
}

/// Hands out one shared scripted transport for every credential.
pub struct ScriptedConnector {
    pub transport: Arc<ScriptedTransport>,
    pub connected: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new(transport: Arc<ScriptedTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            connected: Mutex::new(Vec::new()),
        })
    }
}

impl MailboxConnector for ScriptedConnector {
    fn connect(
        &self,
        credential: &SenderCredential,
    ) -> Result<Arc<dyn MailTransport>, TransportError> {
        self.connected.lock().unwrap().push(credential.email.clone());
        Ok(Arc::clone(&self.transport) as Arc<dyn MailTransport>)
    }
}
