//! Gmail-style REST transport.
//!
//! Authenticates with an OAuth2 refresh token held in the sender's
//! Registry credential row; the short-lived access token is cached in
//! process and renewed ahead of expiry. Sends upload a raw MIME message
//! (base64url); followups carry `In-Reply-To`/`References` plus the
//! provider thread id so the reply lands in the same conversation.
//!
//! Reads (list/fetch) retry transient network failures with the shared
//! retry policy; sends do not — the scheduler owns send retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::MailApiCredentials;
use crate::error::TransportError;
use crate::registry::SenderCredential;
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::{
    MailTransport, MailboxConnector, MessageRef, OutgoingMail, ParsedMessage, SendReceipt, parse,
};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Renew this long before the reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// One authenticated mailbox.
pub struct GmailTransport {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    token: Mutex<Option<CachedToken>>,
    read_retry: RetryPolicy,
}

impl GmailTransport {
    pub fn new(
        http: reqwest::Client,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            refresh_token,
            token: Mutex::new(None),
            read_retry: RetryPolicy::default(),
        }
    }

    /// A valid access token, refreshed through the OAuth2 token endpoint
    /// when missing or near expiry.
    async fn access_token(&self) -> Result<String, TransportError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", self.refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| TransportError::TokenRefresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::TokenRefresh(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::TokenRefresh(e.to_string()))?;
        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access)
    }

    async fn api_error(response: reqwest::Response) -> TransportError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        TransportError::Http { status, message }
    }
}

/// Escape plain text and turn newlines into `<br>` so the body renders
/// with its line structure in HTML mail clients.
pub fn plain_to_html(plain: &str) -> String {
    let escaped = plain
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    escaped.replace('\n', "<br>\n")
}

/// Build the raw MIME message. Followups add threading headers.
fn build_mime(mail: &OutgoingMail) -> String {
    let subject = mail.subject.replace(['\r', '\n'], " ");
    let html_body = plain_to_html(&mail.body)
        .replace("\r\n", "\n")
        .replace('\n', "\r\n");
    let mut lines = vec![
        format!("From: {}", mail.from),
        format!("To: {}", mail.to),
        format!("Subject: {subject}"),
    ];
    if let Some(prior) = mail.in_reply_to.as_deref() {
        let in_reply_to = if prior.starts_with('<') {
            prior.to_string()
        } else {
            format!("<{prior}>")
        };
        lines.push(format!("In-Reply-To: {in_reply_to}"));
        lines.push(format!("References: {in_reply_to}"));
    }
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/html; charset=\"UTF-8\"".to_string());
    lines.push(String::new());
    lines.push(html_body);
    lines.join("\r\n")
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<SendReceipt, TransportError> {
        let token = self.access_token().await?;
        let raw = URL_SAFE_NO_PAD.encode(build_mime(mail));
        let mut body = serde_json::json!({ "raw": raw });
        if let Some(thread_id) = mail.thread_id.as_deref() {
            body["threadId"] = serde_json::Value::String(thread_id.to_string());
        }

        let response = self
            .http
            .post(format!("{API_BASE}/messages/send"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        #[derive(Deserialize)]
        struct SendResponse {
            id: Option<String>,
            #[serde(rename = "threadId")]
            thread_id: Option<String>,
        }
        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        match (sent.id, sent.thread_id) {
            (Some(message_id), Some(thread_id)) => Ok(SendReceipt {
                message_id,
                thread_id,
            }),
            _ => Err(TransportError::InvalidResponse(
                "send response missing message or thread id".into(),
            )),
        }
    }

    async fn list_inbox(&self, max_results: usize) -> Result<Vec<MessageRef>, TransportError> {
        #[derive(Deserialize)]
        struct ListEntry {
            id: Option<String>,
            #[serde(rename = "threadId")]
            thread_id: Option<String>,
        }
        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            messages: Vec<ListEntry>,
        }

        let max = max_results.clamp(1, 500).to_string();
        let max = max.as_str();
        let listed: ListResponse = with_retry(
            &self.read_retry,
            "mail list",
            TransportError::is_transient,
            || async move {
                let token = self.access_token().await?;
                let response = self
                    .http
                    .get(format!("{API_BASE}/messages"))
                    .bearer_auth(&token)
                    .query(&[("q", "in:inbox -in:sent"), ("maxResults", max)])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Self::api_error(response).await);
                }
                response
                    .json()
                    .await
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))
            },
        )
        .await?;

        Ok(listed
            .messages
            .into_iter()
            .filter_map(|m| {
                Some(MessageRef {
                    id: m.id?,
                    thread_id: m.thread_id.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn fetch(
        &self,
        message_id: &str,
        body_max_chars: usize,
    ) -> Result<Option<ParsedMessage>, TransportError> {
        let msg: parse::ApiMessage = with_retry(
            &self.read_retry,
            "mail fetch",
            TransportError::is_transient,
            || async move {
                let token = self.access_token().await?;
                let response = self
                    .http
                    .get(format!("{API_BASE}/messages/{message_id}"))
                    .bearer_auth(&token)
                    .query(&[("format", "full")])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Self::api_error(response).await);
                }
                response
                    .json()
                    .await
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))
            },
        )
        .await?;

        Ok(parse::parse_message(&msg, body_max_chars))
    }
}

/// Builds a `GmailTransport` per sender credential, sharing one HTTP
/// client and the deployment's OAuth client.
pub struct GmailConnector {
    http: reqwest::Client,
    credentials: MailApiCredentials,
}

impl GmailConnector {
    pub fn new(http: reqwest::Client, credentials: MailApiCredentials) -> Self {
        Self { http, credentials }
    }
}

impl MailboxConnector for GmailConnector {
    fn connect(
        &self,
        credential: &SenderCredential,
    ) -> Result<Arc<dyn MailTransport>, TransportError> {
        Ok(Arc::new(GmailTransport::new(
            self.http.clone(),
            self.credentials.client_id.clone(),
            self.credentials.client_secret.clone(),
            credential.secret.clone(),
        )))
    }
}
