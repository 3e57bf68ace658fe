//! HTTP Registry client.
//!
//! Wire API: `POST /v1/collections/{id}/query` (filter + sorts + page
//! size), `POST /v1/collections/{id}/rows` (create), `PATCH /v1/rows/{id}`
//! (partial update). Transient failures are retried with the shared
//! policy; a type-mismatch rejection triggers one retry with the
//! alternate select/status representation.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::warn;

use crate::config::RegistrySettings;
use crate::error::RegistryError;
use crate::registry::rows::{
    InboundRow, OutreachRecord, SendFailure, SentUpdate, StopReason, StopUpdate, field,
};
use crate::registry::value::{FieldMap, FieldValue, fields_to_json, parse_fields};
use crate::registry::{Registry, SenderCredential};
use crate::retry::{RetryPolicy, with_retry};

/// Sender Credentials collection field names. The secret column name is
/// tolerated in both spellings.
const SENDER_EMAIL: &str = "Email";
const SENDER_SECRET: &str = "secret";
const SENDER_SECRET_ALT: &str = "Secret";

static TYPE_MISMATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)property type|does not match|select|status").expect("mismatch pattern")
});

fn is_type_mismatch(message: &str) -> bool {
    TYPE_MISMATCH.is_match(message)
}

/// Flip every select-like value to its alternate representation.
/// Returns `None` when nothing in the map can be flipped.
fn flip_select_like(fields: &FieldMap) -> Option<FieldMap> {
    let mut flipped = FieldMap::new();
    let mut any = false;
    for (name, value) in fields {
        match value.alternate() {
            Some(alt) => {
                any = true;
                flipped.insert(name.clone(), alt);
            }
            None => {
                flipped.insert(name.clone(), value.clone());
            }
        }
    }
    any.then_some(flipped)
}

/// The sendable-record filter: Pending status (in the given shape), all
/// four flags false, required fields non-empty.
fn sendable_filter(status_value: &FieldValue) -> Value {
    json!({
        "and": [
            { "field": field::STATUS, "equals": status_value.to_json() },
            { "field": field::STOPPED, "equals": { "checkbox": false } },
            { "field": field::UNSUBSCRIBED, "equals": { "checkbox": false } },
            { "field": field::BOUNCED, "equals": { "checkbox": false } },
            { "field": field::NEEDS_REVIEW, "equals": { "checkbox": false } },
            { "field": field::RECIPIENT, "not_empty": true },
            { "field": field::SUBJECT, "not_empty": true },
            { "field": field::BODY, "not_empty": true },
        ]
    })
}

struct RawRow {
    id: String,
    fields: FieldMap,
}

/// Registry over HTTP.
pub struct HttpRegistry {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    retry: RetryPolicy,
}

impl HttpRegistry {
    pub fn new(http: reqwest::Client, settings: RegistrySettings) -> Self {
        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token,
            retry: RetryPolicy::default(),
        }
    }

    async fn response_error(response: reqwest::Response) -> RegistryError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        if status == 400 && is_type_mismatch(&message) {
            RegistryError::TypeMismatch { message }
        } else {
            RegistryError::Http { status, message }
        }
    }

    async fn post_query(
        &self,
        collection_id: &str,
        body: &Value,
    ) -> Result<Vec<RawRow>, RegistryError> {
        let url = format!("{}/v1/collections/{collection_id}/query", self.base_url);
        let url = url.as_str();
        let parsed: Value = with_retry(
            &self.retry,
            "registry query",
            RegistryError::is_transient,
            || async move {
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(self.token.expose_secret())
                    .json(body)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Self::response_error(response).await);
                }
                response
                    .json()
                    .await
                    .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
            },
        )
        .await?;

        let results = parsed
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| RegistryError::InvalidResponse("missing results array".into()))?;
        let mut rows = Vec::with_capacity(results.len());
        for result in results {
            let Some(id) = result.get("id").and_then(Value::as_str) else {
                continue;
            };
            let fields = result.get("fields").map(parse_fields).unwrap_or_default();
            rows.push(RawRow {
                id: id.to_string(),
                fields,
            });
        }
        Ok(rows)
    }

    async fn patch_row(&self, row_id: &str, fields: &Value) -> Result<(), RegistryError> {
        let url = format!("{}/v1/rows/{row_id}", self.base_url);
        let url = url.as_str();
        with_retry(
            &self.retry,
            "registry update",
            RegistryError::is_transient,
            || async move {
                let response = self
                    .http
                    .patch(url)
                    .bearer_auth(self.token.expose_secret())
                    .json(&json!({ "fields": fields }))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Self::response_error(response).await);
                }
                Ok(())
            },
        )
        .await
    }

    async fn post_row(
        &self,
        collection_id: &str,
        fields: &Value,
    ) -> Result<String, RegistryError> {
        let url = format!("{}/v1/collections/{collection_id}/rows", self.base_url);
        let url = url.as_str();
        let created: Value = with_retry(
            &self.retry,
            "registry create",
            RegistryError::is_transient,
            || async move {
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(self.token.expose_secret())
                    .json(&json!({ "fields": fields }))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Self::response_error(response).await);
                }
                response
                    .json()
                    .await
                    .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
            },
        )
        .await?;

        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RegistryError::InvalidResponse("create returned no row id".into()))
    }

    /// Partial update, retrying once with the alternate select/status
    /// shape if the store rejects the representation.
    async fn update_fields(&self, row_id: &str, fields: &FieldMap) -> Result<(), RegistryError> {
        match self.patch_row(row_id, &fields_to_json(fields)).await {
            Err(RegistryError::TypeMismatch { message }) => match flip_select_like(fields) {
                Some(flipped) => self.patch_row(row_id, &fields_to_json(&flipped)).await,
                None => Err(RegistryError::TypeMismatch { message }),
            },
            other => other,
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn query_sendable(
        &self,
        collection_id: &str,
        batch_size: usize,
    ) -> Result<Vec<OutreachRecord>, RegistryError> {
        let sorts = json!([{ "field": field::QUEUED_AT, "direction": "ascending" }]);
        let page_size = batch_size.clamp(1, 100);
        let primary = FieldValue::Status("Pending".to_string());

        let body = json!({
            "filter": sendable_filter(&primary),
            "sorts": sorts.clone(),
            "page_size": page_size,
        });
        let rows = match self.post_query(collection_id, &body).await {
            Err(RegistryError::TypeMismatch { .. }) => {
                let alternate = primary.alternate().expect("status has an alternate");
                let body = json!({
                    "filter": sendable_filter(&alternate),
                    "sorts": sorts,
                    "page_size": page_size,
                });
                self.post_query(collection_id, &body).await?
            }
            other => other?,
        };

        Ok(rows
            .iter()
            .map(|row| OutreachRecord::from_fields(&row.id, &row.fields))
            .collect())
    }

    async fn find_record_ids_by_thread(
        &self,
        collection_id: &str,
        thread_id: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let body = json!({
            "filter": { "field": field::THREAD_ID, "equals": { "text": thread_id } },
            "page_size": 10,
        });
        let rows = self.post_query(collection_id, &body).await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn inbound_exists(
        &self,
        collection_id: &str,
        message_id: &str,
    ) -> Result<bool, RegistryError> {
        let body = json!({
            "filter": {
                "field": super::rows::inbound_field::MESSAGE_ID,
                "equals": { "text": message_id },
            },
            "page_size": 1,
        });
        let rows = self.post_query(collection_id, &body).await?;
        Ok(!rows.is_empty())
    }

    async fn create_inbound(
        &self,
        collection_id: &str,
        row: &InboundRow,
    ) -> Result<String, RegistryError> {
        self.post_row(collection_id, &fields_to_json(&row.to_fields()))
            .await
    }

    async fn mark_sent(&self, record_id: &str, update: &SentUpdate) -> Result<(), RegistryError> {
        self.update_fields(record_id, &update.to_fields()).await
    }

    async fn mark_send_failure(
        &self,
        record_id: &str,
        failure: &SendFailure,
    ) -> Result<(), RegistryError> {
        self.update_fields(record_id, &failure.to_fields()).await
    }

    async fn mark_stopped(&self, record_id: &str, stop: &StopUpdate) -> Result<(), RegistryError> {
        self.update_fields(record_id, &stop.to_fields()).await?;

        // Optional columns; collections without them are fine.
        if stop.reason == StopReason::BounceHard {
            let mut extra = FieldMap::new();
            extra.insert(
                field::BOUNCE_TYPE.into(),
                FieldValue::Select("Hard".to_string()),
            );
            if let Err(e) = self.update_fields(record_id, &extra).await {
                warn!(record_id, "Bounce Type write failed (column may be absent): {e}");
            }
        }
        if let Some(received_at) = stop.received_at {
            let mut extra = FieldMap::new();
            extra.insert(
                field::LAST_INBOUND_AT.into(),
                FieldValue::Date(Some(received_at)),
            );
            if let Err(e) = self.update_fields(record_id, &extra).await {
                warn!(
                    record_id,
                    "Last Inbound At write failed (column may be absent): {e}"
                );
            }
        }
        Ok(())
    }

    async fn mark_replied(&self, record_id: &str) -> Result<(), RegistryError> {
        let mut fields = FieldMap::new();
        fields.insert(
            field::STATUS.into(),
            FieldValue::Select("Replied".to_string()),
        );
        match self.update_fields(record_id, &fields).await {
            Err(RegistryError::TypeMismatch { message }) => {
                // Both shapes rejected — the status option likely does
                // not exist in this collection. Flag loudly, don't fail
                // the message.
                warn!(record_id, "Replied status not accepted by the store: {message}");
                Ok(())
            }
            other => other,
        }
    }

    async fn find_sender_credential(
        &self,
        collection_id: &str,
        account: &str,
    ) -> Result<Option<SenderCredential>, RegistryError> {
        let normalized = account.trim();
        let body = json!({
            "filter": { "field": SENDER_EMAIL, "equals": { "text": normalized } },
            "page_size": 1,
        });

        // Filtered lookup may miss email-typed columns; fall back to a
        // bounded scan matched in memory.
        let mut rows = self.post_query(collection_id, &body).await.unwrap_or_default();
        if rows.is_empty() {
            rows = self
                .post_query(collection_id, &json!({ "page_size": 100 }))
                .await?;
        }

        for row in rows {
            let email = row
                .fields
                .get(SENDER_EMAIL)
                .and_then(FieldValue::as_text)
                .unwrap_or_default()
                .trim()
                .to_string();
            if email != normalized {
                continue;
            }
            let secret = [SENDER_SECRET, SENDER_SECRET_ALT]
                .iter()
                .filter_map(|name| row.fields.get(*name).and_then(FieldValue::as_text))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string();
            if secret.is_empty() {
                continue;
            }
            return Ok(Some(SenderCredential {
                email,
                secret: SecretString::from(secret),
            }));
        }
        Ok(None)
    }
}
