//! Wire-message parsing: provider JSON payloads → `ParsedMessage`.
//!
//! Body extraction prefers the text/plain part, falls back to text/html
//! converted to plain text, and caps the result at a configured size
//! with head and tail preserved — signatures, STOP replies and DSN
//! status lines tend to live at the end.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::transport::ParsedMessage;

/// A full message as returned by the mail API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub id: Option<String>,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub snippet: Option<String>,
    /// Epoch milliseconds as a decimal string.
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
    pub payload: Option<ApiPart>,
}

/// One MIME part of a message payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPart {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<ApiHeader>,
    pub body: Option<ApiBody>,
    #[serde(default)]
    pub parts: Vec<ApiPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiHeader {
    pub name: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiBody {
    pub data: Option<String>,
}

/// Parse an API message into the normalized form. `None` when the
/// provider omitted the message or thread identifier.
pub fn parse_message(msg: &ApiMessage, body_max_chars: usize) -> Option<ParsedMessage> {
    let message_id = msg.id.clone()?;
    let thread_id = msg.thread_id.clone()?;
    let headers = msg
        .payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or_default();

    let from = header(headers, "From").unwrap_or_default();
    let to = header(headers, "To").unwrap_or_default();
    let delivered_to = header(headers, "Delivered-To");
    let to_email = delivered_to.filter(|d| !d.is_empty()).unwrap_or(to);
    let subject = header(headers, "Subject").unwrap_or_default();

    let received_at = msg
        .internal_date
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    let auto_submitted = header(headers, "Auto-Submitted");
    let precedence = header(headers, "Precedence").map(|p| p.to_lowercase());
    let has_auto_response_suppress = header(headers, "X-Auto-Response-Suppress").is_some();

    let from_lower = from.to_lowercase();
    let is_mailer_daemon =
        from_lower.contains("mailer-daemon") || from_lower.contains("postmaster");
    let has_multipart_report = msg
        .payload
        .as_ref()
        .is_some_and(has_multipart_report_mime);

    let body_plain = msg
        .payload
        .as_ref()
        .map(|p| extract_body_plain(p, body_max_chars))
        .unwrap_or_default();

    Some(ParsedMessage {
        message_id,
        thread_id,
        from_email: from,
        to_email,
        received_at,
        subject,
        snippet: msg.snippet.clone().unwrap_or_default().trim().to_string(),
        body_plain,
        auto_submitted,
        precedence,
        is_mailer_daemon,
        has_multipart_report,
        has_auto_response_suppress,
    })
}

fn header(headers: &[ApiHeader], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| {
            h.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.value.as_deref())
        .map(|v| v.trim().to_string())
}

/// Whether the payload root or any nested part is a multipart/report
/// (delivery status notifications and friends).
fn has_multipart_report_mime(part: &ApiPart) -> bool {
    if part
        .mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("multipart/report"))
    {
        return true;
    }
    part.parts.iter().any(has_multipart_report_mime)
}

/// Extract plain text: prefer a text/plain part, fall back to text/html
/// converted, then to the root body. Applies the size cap.
fn extract_body_plain(payload: &ApiPart, max_chars: usize) -> String {
    let mut text = String::new();
    if !payload.parts.is_empty() {
        let find = |mime: &str| {
            payload.parts.iter().find(|p| {
                p.mime_type
                    .as_deref()
                    .is_some_and(|m| m.eq_ignore_ascii_case(mime))
            })
        };
        if let Some(data) = find("text/plain").and_then(|p| p.body.as_ref()?.data.as_deref()) {
            text = decode_base64url(data);
        } else if let Some(data) = find("text/html").and_then(|p| p.body.as_ref()?.data.as_deref())
        {
            text = html_to_text(&decode_base64url(data));
        }
    } else if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
        let raw = decode_base64url(data);
        text = match payload.mime_type.as_deref() {
            Some(m) if m.eq_ignore_ascii_case("text/html") => html_to_text(&raw),
            _ => raw,
        };
    }
    truncate_head_tail(&text, max_chars)
}

fn decode_base64url(data: &str) -> String {
    let trimmed = data.trim_end_matches('=');
    match URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Basic HTML → text: line breaks for br/p/div, tags stripped, common
/// entities decoded, runs of blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let mut s = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        s.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('>') else {
            rest = "";
            break;
        };
        let tag = tail[1..close].trim().to_lowercase();
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");
        if matches!(name, "br" | "p" | "div") {
            s.push('\n');
        }
        rest = &tail[close + 1..];
    }
    s.push_str(rest);

    let s = s
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0;
    for line in s.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

const TRUNCATION_MARKER: &str = "\n\n... [truncated] ...\n\n";

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Cap overlong text, keeping 60% head and the remaining tail around a
/// truncation marker.
pub fn truncate_head_tail(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }
    let head = (max_chars * 6) / 10;
    let tail = max_chars
        .saturating_sub(head)
        .saturating_sub(TRUNCATION_MARKER.len());
    let head_end = floor_char_boundary(s, head);
    let tail_start = floor_char_boundary(s, s.len().saturating_sub(tail));
    format!(
        "{}{}{}",
        &s[..head_end],
        TRUNCATION_MARKER,
        &s[tail_start..]
    )
}
