//! Bounce detection: candidacy gate, then hard/soft markers.
//!
//! Only bounce *candidates* (mailer-daemon/postmaster senders,
//! multipart/report payloads, or delivery-failure phrasing) are
//! inspected for hard/soft markers. Hard markers are matched against
//! the quote-stripped new content; soft markers anywhere in the raw
//! body exclude a hard classification.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::quote::new_content_before_quote;
use crate::transport::ParsedMessage;

const CANDIDATE_FROM: &[&str] = &["mailer-daemon", "postmaster"];

const CANDIDATE_SUBJECT: &[&str] = &[
    "delivery status notification",
    "undelivered mail",
    "mail delivery failed",
    "returned mail",
    "failure notice",
];

const CANDIDATE_BODY: &[&str] = &[
    "diagnostic-code",
    "status:",
    "final-recipient:",
    "action: failed",
];

/// Hard markers: recipient/address does not exist.
const HARD_RECIPIENT: &[&str] = &[
    "user unknown",
    "no such user",
    "unknown user",
    "recipient address rejected",
    "mailbox not found",
    "address not found",
    "invalid recipient",
    "550 5.1.1",
    "550 5.1.0",
    "status: 5.1.1",
    "status: 5.1.0",
];

/// Hard markers: domain/host does not exist.
const HARD_DOMAIN: &[&str] = &[
    "domain not found",
    "host not found",
    "nxdomain",
    "unrouteable address",
];

/// Soft markers: temporary deferral; their presence excludes a hard
/// classification.
const SOFT_PHRASES: &[&str] = &[
    "mailbox full",
    "temporarily deferred",
    "try again later",
    "status: 4.",
];

static SOFT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)status:\s*4\.\d", r"\b4\.\d+\.\d+"]
        .iter()
        .map(|p| Regex::new(p).expect("soft bounce pattern"))
        .collect()
});

/// Whether a message qualifies as a bounce candidate at all.
/// Non-candidates skip the bounce branch entirely.
pub fn is_bounce_candidate(msg: &ParsedMessage) -> bool {
    if msg.is_mailer_daemon || msg.has_multipart_report {
        return true;
    }
    let from = msg.from_email.to_lowercase();
    let subject = msg.subject.to_lowercase();
    let body = msg.body_plain.to_lowercase();
    CANDIDATE_FROM.iter().any(|m| from.contains(m))
        || CANDIDATE_SUBJECT.iter().any(|m| subject.contains(m))
        || CANDIDATE_BODY.iter().any(|m| body.contains(m))
}

fn has_soft_marker(body_lower: &str) -> bool {
    SOFT_PHRASES.iter().any(|m| body_lower.contains(m))
        || SOFT_PATTERNS.iter().any(|p| p.is_match(body_lower))
}

/// Hard bounce: a candidate whose new content carries a hard marker and
/// whose body carries no soft marker (soft excludes hard).
pub fn detect_hard_bounce(msg: &ParsedMessage) -> bool {
    if !is_bounce_candidate(msg) {
        return false;
    }
    if has_soft_marker(&msg.body_plain.to_lowercase()) {
        return false;
    }
    let new_content = new_content_before_quote(&msg.body_plain);
    HARD_RECIPIENT.iter().any(|m| new_content.contains(m))
        || HARD_DOMAIN.iter().any(|m| new_content.contains(m))
}

/// Soft bounce: a candidate with a soft marker that is not hard.
/// Hard wins over soft.
pub fn detect_soft_bounce(msg: &ParsedMessage) -> bool {
    if !is_bounce_candidate(msg) {
        return false;
    }
    if detect_hard_bounce(msg) {
        return false;
    }
    has_soft_marker(&msg.body_plain.to_lowercase())
}
