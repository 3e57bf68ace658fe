//! Inbound message classification.
//!
//! Layered, first match wins: header-declared automation, then bounce
//! candidates (hard/soft, conservatively defaulting to hard), then the
//! out-of-office heuristic, then quote structure as a human-reply
//! signal, then Other. Unsubscribe detection runs independently and
//! overrides the layered tag in the final disposition.

pub mod bounce;
pub mod quote;
pub mod unsubscribe;

use crate::transport::ParsedMessage;

pub use unsubscribe::{UnsubscribeMatch, detect_unsubscribe};

/// Out-of-office phrasing, matched against quote-stripped new content.
const OOO_KEYWORDS: &[&str] = &[
    "out of office",
    "automatic reply",
    "away until",
    "currently unavailable",
    "i will return on",
];

/// Final classification tag of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    HumanReply,
    AutoReply,
    Unsubscribe,
    BounceHard,
    BounceSoft,
    Other,
}

impl Classification {
    /// Display label, as stored in the Registry.
    pub fn label(&self) -> &'static str {
        match self {
            Self::HumanReply => "Human Reply",
            Self::AutoReply => "Auto Reply",
            Self::Unsubscribe => "Unsubscribe",
            Self::BounceHard => "Bounce Hard",
            Self::BounceSoft => "Bounce Soft",
            Self::Other => "Other",
        }
    }

    /// Terminal classifications stop-loss the outreach record.
    pub fn is_stop_loss(&self) -> bool {
        matches!(self, Self::Unsubscribe | Self::BounceHard)
    }
}

/// Layered content classification. Never returns `Unsubscribe` — that
/// override belongs to [`resolve`].
pub fn classify(msg: &ParsedMessage) -> Classification {
    let auto_submitted = msg
        .auto_submitted
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let precedence = msg.precedence.as_deref().unwrap_or_default();
    if auto_submitted == "auto-replied"
        || auto_submitted == "auto-generated"
        || precedence == "auto_reply"
    {
        return Classification::AutoReply;
    }

    if bounce::is_bounce_candidate(msg) {
        if bounce::detect_hard_bounce(msg) {
            return Classification::BounceHard;
        }
        if bounce::detect_soft_bounce(msg) {
            return Classification::BounceSoft;
        }
        // A candidate matching neither marker set is treated as hard so
        // sending stops. Deliberate conservative default.
        return Classification::BounceHard;
    }

    let new_content = quote::new_content_before_quote(&msg.body_plain);
    if OOO_KEYWORDS.iter().any(|k| new_content.contains(k)) {
        return Classification::AutoReply;
    }
    if quote::has_quote_structure(&msg.body_plain) {
        return Classification::HumanReply;
    }
    Classification::Other
}

/// The final disposition written back to the Registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub classification: Classification,
    /// True for a weak unsubscribe match — the stop must be human-checked.
    pub needs_review: bool,
}

/// Combine the layered classifier with the unsubscribe override.
pub fn resolve(msg: &ParsedMessage) -> Disposition {
    match detect_unsubscribe(&msg.body_plain) {
        Some(UnsubscribeMatch::Strong) => Disposition {
            classification: Classification::Unsubscribe,
            needs_review: false,
        },
        Some(UnsubscribeMatch::Weak) => Disposition {
            classification: Classification::Unsubscribe,
            needs_review: true,
        },
        None => Disposition {
            classification: classify(msg),
            needs_review: false,
        },
    }
}
