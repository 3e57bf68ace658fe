//! Unsubscribe / STOP detection over quote-stripped new content.
//!
//! A strong match stop-losses the record outright. A weak match (a
//! "not interested" phrase combined with a stop-like word) also
//! stop-losses, but flags the row for human review — low-confidence
//! stops must be checked.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::quote::new_content_before_quote;

/// Explicit unsubscribe phrasing, English.
const STRONG_EN: &[&str] = &[
    "unsubscribe",
    "remove me",
    "do not contact",
    "don't contact",
    "stop emailing",
    "stop sending",
];

/// Explicit unsubscribe phrasing, Chinese.
const STRONG_CN: &[&str] = &[
    "退订",
    "取消订阅",
    "别再发",
    "停止发送",
    "拉黑我",
    "不要再联系",
    "不要再跟进",
    "不要再发",
];

const WEAK_NOT_INTERESTED: &[&str] = &["not interested", "no longer interested"];
const WEAK_STOP: &[&str] = &["stop", "don't", "do not", "remove"];

/// A body that is nothing but the word "stop".
static ONLY_STOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*stop\s*$").expect("only-stop pattern"));

/// Confidence of an unsubscribe match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeMatch {
    Strong,
    Weak,
}

/// Detect unsubscribe intent in the new content of a body.
pub fn detect_unsubscribe(body: &str) -> Option<UnsubscribeMatch> {
    let norm = new_content_before_quote(body);
    if norm.is_empty() {
        return None;
    }

    let strong = ONLY_STOP.is_match(&norm)
        || STRONG_EN.iter().any(|k| norm.contains(k))
        || STRONG_CN.iter().any(|k| norm.contains(k));
    if strong {
        return Some(UnsubscribeMatch::Strong);
    }

    let not_interested = WEAK_NOT_INTERESTED.iter().any(|k| norm.contains(k));
    let stop_like = WEAK_STOP.iter().any(|k| norm.contains(k));
    if not_interested && stop_like {
        return Some(UnsubscribeMatch::Weak);
    }

    None
}
