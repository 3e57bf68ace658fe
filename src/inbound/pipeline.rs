//! Inbound pipeline — poll mailboxes, classify, record, apply the
//! terminal side-effect.
//!
//! Per mailbox per cycle: list recent inbox messages, skip anything the
//! idempotency guard has already seen, fetch + parse the rest, route by
//! thread id, classify, write the Inbound Message row, then either
//! stop-loss the record (unsubscribe / hard bounce) or mark it Replied.
//! Unrouted messages are skipped entirely — no orphaned rows.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify;
use crate::config::GroupsConfig;
use crate::error::PipelineError;
use crate::inbound::router::{self, candidate_groups};
use crate::registry::{InboundRow, Registry, StopReason, StopUpdate};
use crate::transport::{MailTransport, MailboxConnector, MessageRef, ParsedMessage};

const LIST_INBOX_MAX_RESULTS: usize = 50;

/// Inbound Message title: `YYYY-MM-DD HH:MM — <from> — <subject≤80>`.
pub fn message_title(parsed: &ParsedMessage) -> String {
    let subject: String = parsed.subject.chars().take(80).collect();
    format!(
        "{} — {} — {}",
        parsed.received_at.format("%Y-%m-%d %H:%M"),
        parsed.from_email,
        subject
    )
}

/// Identifier stamped on every row written by one poll run.
pub fn run_id(now: DateTime<Utc>) -> String {
    format!("{}-inbound-01", now.format("%Y-%m-%dT%H:%M:%SZ"))
}

pub struct InboundPipeline {
    registry: Arc<dyn Registry>,
    connector: Arc<dyn MailboxConnector>,
    config: GroupsConfig,
}

impl InboundPipeline {
    pub fn new(
        registry: Arc<dyn Registry>,
        connector: Arc<dyn MailboxConnector>,
        config: GroupsConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            config,
        }
    }

    /// One poll cycle over every configured mailbox. A mailbox failing
    /// never blocks the others.
    pub async fn run_cycle(&self) {
        let run = run_id(Utc::now());
        for mailbox in self.config.unique_mailboxes() {
            if let Err(e) = self.poll_mailbox(&mailbox, &run).await {
                warn!(mailbox, "Mailbox poll failed: {e}");
            }
        }
    }

    async fn poll_mailbox(&self, mailbox: &str, run: &str) -> Result<(), PipelineError> {
        let Some(first_group) = self
            .config
            .groups
            .iter()
            .find(|g| g.contains_mailbox(mailbox))
        else {
            return Ok(());
        };
        let credential = self
            .registry
            .find_sender_credential(&first_group.senders_collection_id, mailbox)
            .await?;
        let Some(credential) = credential else {
            warn!(mailbox, "No sender credential, skipping mailbox");
            return Ok(());
        };
        let transport = self
            .connector
            .connect(&credential)
            .map_err(PipelineError::Transport)?;

        let refs = transport.list_inbox(LIST_INBOX_MAX_RESULTS).await?;
        debug!(mailbox, count = refs.len(), "Listed inbox messages");
        for msg_ref in refs {
            if let Err(e) = self
                .process_message(transport.as_ref(), mailbox, &msg_ref, run)
                .await
            {
                warn!(
                    mailbox,
                    message_id = %msg_ref.id,
                    "Failed to process message: {e}"
                );
            }
        }
        Ok(())
    }

    async fn process_message(
        &self,
        transport: &dyn MailTransport,
        mailbox: &str,
        msg_ref: &MessageRef,
        run: &str,
    ) -> Result<(), PipelineError> {
        // Idempotency guard before the (expensive) fetch. A mailbox can
        // belong to several groups; the message counts as seen if any of
        // their inbound stores has it.
        for &index in &candidate_groups(&self.config.groups, mailbox) {
            if self
                .registry
                .inbound_exists(
                    &self.config.groups[index].inbound_collection_id,
                    &msg_ref.id,
                )
                .await?
            {
                return Ok(());
            }
        }

        let Some(parsed) = transport
            .fetch(&msg_ref.id, self.config.body_max_chars)
            .await?
        else {
            debug!(message_id = %msg_ref.id, "Message unparseable or gone");
            return Ok(());
        };

        let outcome =
            router::route(self.registry.as_ref(), &self.config.groups, mailbox, &parsed.thread_id)
                .await?;
        let Some(record_id) = outcome.record_id else {
            // No unique record: write nothing, otherwise the inbound
            // store fills with orphaned rows.
            debug!(
                mailbox,
                thread_id = %parsed.thread_id,
                group = outcome.group_index,
                "Unrouted inbound message, skipping"
            );
            return Ok(());
        };
        let group = &self.config.groups[outcome.group_index];

        let disposition = classify::resolve(&parsed);
        let needs_review = outcome.needs_review || disposition.needs_review;

        let row = InboundRow {
            title: message_title(&parsed),
            message_id: parsed.message_id.clone(),
            thread_id: parsed.thread_id.clone(),
            from_email: parsed.from_email.clone(),
            to_email: parsed.to_email.clone(),
            received_at: parsed.received_at,
            subject: parsed.subject.clone(),
            body: parsed.body_plain.clone(),
            snippet: parsed.snippet.clone(),
            run_id: run.to_string(),
            classification: disposition.classification,
            needs_review,
            record_id: Some(record_id.clone()),
            auto_response_suppress: parsed.has_auto_response_suppress,
            bulk_precedence: matches!(parsed.precedence.as_deref(), Some("bulk") | Some("list")),
        };
        self.registry
            .create_inbound(&group.inbound_collection_id, &row)
            .await?;

        let stop = disposition.classification.is_stop_loss();
        if stop {
            let reason = match disposition.classification {
                classify::Classification::Unsubscribe => StopReason::Unsubscribe,
                _ => StopReason::BounceHard,
            };
            self.registry
                .mark_stopped(
                    &record_id,
                    &StopUpdate {
                        reason,
                        received_at: Some(parsed.received_at),
                    },
                )
                .await?;
        } else {
            self.registry.mark_replied(&record_id).await?;
        }

        info!(
            mailbox,
            thread_id = %parsed.thread_id,
            from = %parsed.from_email,
            classification = disposition.classification.label(),
            stop,
            needs_review,
            "Inbound message recorded"
        );
        Ok(())
    }
}

/// Spawn the inbound poll loop. Set the returned flag to stop.
pub fn spawn_inbound_listener(pipeline: InboundPipeline) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let interval = pipeline.config.poll_interval();
        info!(
            "Inbound listener started — polling every {}s",
            interval.as_secs()
        );
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                info!("Inbound listener shutting down");
                return;
            }
            pipeline.run_cycle().await;
        }
    });

    (handle, shutdown_flag)
}
