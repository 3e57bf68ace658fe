//! Quote stripping — isolate the sender's newly written content.
//!
//! Inbound bodies usually carry the quoted thread below a reply marker.
//! Both bounce and unsubscribe detection must only ever see the text
//! above the earliest marker, otherwise quoted history (our own outreach
//! copy included) triggers false matches.
//!
//! The marker set is ordered data, not code: new locales or client
//! conventions are added to the table.

use std::sync::LazyLock;

use regex::Regex;

/// Quoted-reply markers, covering the English "On … wrote:" convention,
/// the Chinese "<email> 于 … 写道：" convention (with and without a
/// leading newline), and generic original/forwarded-message banners.
static QUOTE_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\n\s*On\s+.+wrote\s*:",
        r"(?i)\n-{2,}\s*Original Message\s*-*",
        r"(?i)\n-{2,}\s*Forwarded message\s*-*",
        r"\n\s*<[^>]+>\s*于\s*.+写道\s*[：:]",
        r"<[^>]+>\s*于\s*.+写道\s*[：:]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("quote marker pattern"))
    .collect()
});

/// Collapse runs of whitespace to single spaces, lower-case, trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The normalized text before the earliest quoted-reply marker.
///
/// If no marker matches and the text spans multiple lines, the first
/// line is used — the common shape of a bare "STOP" typed above an
/// un-marked quoted thread. Single-line text is returned whole.
pub fn new_content_before_quote(body: &str) -> String {
    let raw = body.trim();
    let mut cut = raw.len();
    for marker in QUOTE_MARKERS.iter() {
        if let Some(m) = marker.find(raw) {
            cut = cut.min(m.start());
        }
    }
    let before = &raw[..cut];
    if cut == raw.len() && before.contains('\n') {
        return normalize(before.lines().next().unwrap_or(""));
    }
    normalize(before)
}

/// Whether the raw body contains any quoted-reply marker at all — a
/// structural signal that a human replied in-thread.
pub fn has_quote_structure(body: &str) -> bool {
    let raw = body.trim();
    QUOTE_MARKERS.iter().any(|marker| marker.is_match(raw))
}
