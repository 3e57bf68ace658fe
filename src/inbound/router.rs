//! Thread routing — map a (mailbox, thread id) pair to at most one
//! Outreach Record.
//!
//! Groups that include the mailbox are tried in configuration order;
//! the first group where exactly one record carries the thread id wins.
//! Zero matches everywhere, or more than one in a group, means no
//! automatic binding: the message is reported unrouted with the first
//! candidate group attached for audit only.

use tracing::debug;

use crate::config::MailboxGroup;
use crate::error::RegistryError;
use crate::registry::Registry;

/// Result of routing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// The group that matched, or the first candidate group when
    /// unrouted (audit only — no record id, so nothing is written).
    pub group_index: usize,
    pub record_id: Option<String>,
    pub needs_review: bool,
}

/// Indexes of groups that include the mailbox, in priority order.
pub fn candidate_groups(groups: &[MailboxGroup], mailbox: &str) -> Vec<usize> {
    groups
        .iter()
        .enumerate()
        .filter(|(_, group)| group.contains_mailbox(mailbox))
        .map(|(index, _)| index)
        .collect()
}

/// Route a thread id to a unique Outreach Record. Binding requires a
/// single match across every candidate group — one match each in two
/// groups is just as ambiguous as two in one.
pub async fn route(
    registry: &dyn Registry,
    groups: &[MailboxGroup],
    mailbox: &str,
    thread_id: &str,
) -> Result<RouteOutcome, RegistryError> {
    let candidates = candidate_groups(groups, mailbox);
    let mut matches: Vec<(usize, String)> = Vec::new();
    for &index in &candidates {
        let ids = registry
            .find_record_ids_by_thread(&groups[index].records_collection_id, thread_id)
            .await?;
        matches.extend(ids.into_iter().map(|id| (index, id)));
    }
    if matches.len() == 1 {
        let (group_index, record_id) = matches.remove(0);
        return Ok(RouteOutcome {
            group_index,
            record_id: Some(record_id),
            needs_review: false,
        });
    }
    if matches.len() > 1 {
        debug!(
            mailbox,
            thread_id,
            matches = matches.len(),
            "Ambiguous thread match, not binding"
        );
    }
    Ok(RouteOutcome {
        group_index: candidates.first().copied().unwrap_or(0),
        record_id: None,
        needs_review: true,
    })
}
