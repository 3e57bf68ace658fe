//! Outbound scheduler — drains the pending queue under per-sender
//! throttling.
//!
//! Each cycle queries every configured group for sendable records,
//! groups them by sender preserving queue order, and attempts at most
//! one send per eligible sender. The cycle then sleeps until the next
//! sender becomes eligible (capped), or a short idle interval when
//! nothing is pending. One record failing never blocks other senders.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{MailboxGroup, ThrottleConfig};
use crate::error::{PipelineError, TransportError};
use crate::outbound::ledger::Ledger;
use crate::registry::{OutreachRecord, Registry, SendFailure, SentUpdate};
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::{MailboxConnector, OutgoingMail};

/// Idle sleep when no sender has pending work.
const SLEEP_IDLE: Duration = Duration::from_secs(60);
/// Upper bound on the computed inter-cycle sleep.
const SLEEP_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Group records by sender account, preserving queue order within each
/// sender and first-seen order across senders.
fn group_by_sender(records: Vec<OutreachRecord>) -> Vec<(String, Vec<OutreachRecord>)> {
    let mut grouped: Vec<(String, Vec<OutreachRecord>)> = Vec::new();
    for record in records {
        let key = if record.sender_account.trim().is_empty() {
            "(empty)".to_string()
        } else {
            record.sender_account.trim().to_string()
        };
        match grouped.iter_mut().find(|(sender, _)| *sender == key) {
            Some((_, list)) => list.push(record),
            None => grouped.push((key, vec![record])),
        }
    }
    grouped
}

pub struct OutboundScheduler {
    registry: Arc<dyn Registry>,
    connector: Arc<dyn MailboxConnector>,
    groups: Vec<MailboxGroup>,
    throttle: ThrottleConfig,
    batch_size: usize,
    send_retry: RetryPolicy,
    ledger: Ledger,
    rng: StdRng,
}

impl OutboundScheduler {
    pub fn new(
        registry: Arc<dyn Registry>,
        connector: Arc<dyn MailboxConnector>,
        groups: Vec<MailboxGroup>,
        throttle: ThrottleConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            connector,
            groups,
            throttle,
            batch_size,
            send_retry: RetryPolicy::default(),
            ledger: Ledger::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// One scheduler cycle. Returns how long to sleep before the next.
    pub async fn run_cycle(&mut self) -> Duration {
        let mut pending_senders: HashSet<String> = HashSet::new();

        for group_index in 0..self.groups.len() {
            let group = self.groups[group_index].clone();
            let records = match self
                .registry
                .query_sendable(&group.records_collection_id, self.batch_size)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    error!(
                        collection = %group.records_collection_id,
                        "Sendable query failed, skipping group this cycle: {e}"
                    );
                    continue;
                }
            };

            let mut sendable = Vec::new();
            for record in records {
                match record.validate_sendable() {
                    Ok(()) => sendable.push(record),
                    Err(reason) => {
                        warn!(record_id = %record.id, "Skipping record: {reason}");
                    }
                }
            }
            if sendable.is_empty() {
                continue;
            }
            debug!(
                collection = %group.records_collection_id,
                count = sendable.len(),
                "Sendable records this cycle"
            );

            for (sender, queue) in group_by_sender(sendable) {
                pending_senders.insert(sender.clone());
                let now = Utc::now();
                if !self.ledger.roll(&sender, now, &self.throttle) {
                    continue;
                }
                // Earliest-queued record only; one send per sender per
                // cycle keeps pacing natural even under retries.
                let record = &queue[0];
                match self.attempt_send(&group, record).await {
                    Ok(true) => {
                        self.ledger
                            .record_send(&sender, Utc::now(), &self.throttle, &mut self.rng);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(record_id = %record.id, "Send attempt not recorded: {e}");
                    }
                }
            }
        }

        if pending_senders.is_empty() {
            return SLEEP_IDLE;
        }
        let now = Utc::now();
        self.ledger
            .shortest_wait(now, pending_senders.iter().map(String::as_str))
            .map(|wait| wait.min(SLEEP_MAX))
            .unwrap_or(SLEEP_IDLE)
    }

    /// Send one record. `Ok(true)` means the message went out and was
    /// written back; `Ok(false)` means the failure was recorded on the
    /// record (credential missing, misconfigured followup, exhausted or
    /// permanent send error).
    async fn attempt_send(
        &self,
        group: &MailboxGroup,
        record: &OutreachRecord,
    ) -> Result<bool, PipelineError> {
        let credential = self
            .registry
            .find_sender_credential(&group.senders_collection_id, &record.sender_account)
            .await?;
        let Some(credential) = credential else {
            warn!(
                record_id = %record.id,
                sender = %record.sender_account,
                "Sender credential not found"
            );
            let failure = SendFailure::review(format!(
                "sender credential not found: {}",
                record.sender_account
            ));
            self.registry.mark_send_failure(&record.id, &failure).await?;
            return Ok(false);
        };

        let followup = record.is_followup();
        if followup && record.message_id_last.is_none() {
            // Thread id without a prior message id is a configuration
            // error, not a retryable condition.
            let failure =
                SendFailure::review("followup record is missing its last message id");
            self.registry.mark_send_failure(&record.id, &failure).await?;
            return Ok(false);
        }

        let transport = self
            .connector
            .connect(&credential)
            .map_err(PipelineError::Transport)?;
        let mail = OutgoingMail {
            from: credential.email.clone(),
            to: record.recipient.clone(),
            subject: record.subject.clone(),
            body: record.body.clone(),
            thread_id: followup.then(|| record.thread_id.clone()).flatten(),
            in_reply_to: followup.then(|| record.message_id_last.clone()).flatten(),
        };

        let transport = transport.as_ref();
        let mail = &mail;
        let sent = with_retry(
            &self.send_retry,
            "outbound send",
            TransportError::is_transient,
            || async move { transport.send(mail).await },
        )
        .await;

        match sent {
            Ok(receipt) => {
                info!(
                    record_id = %record.id,
                    to = %record.recipient,
                    message_id = %receipt.message_id,
                    followup,
                    "Sent"
                );
                let update = SentUpdate {
                    sent_at: Utc::now(),
                    thread_id: receipt.thread_id,
                    message_id: receipt.message_id,
                    subject_last: record.subject.clone(),
                };
                self.registry.mark_sent(&record.id, &update).await?;
                Ok(true)
            }
            Err(e) => {
                // Permanent failures stop the record outright; transient
                // exhaustion leaves it Pending + needs-review for a later
                // cycle.
                let stopped = !e.is_transient();
                warn!(record_id = %record.id, stopped, "Send failed: {e}");
                let failure = SendFailure {
                    stop_reason: e.to_string(),
                    stopped,
                };
                self.registry.mark_send_failure(&record.id, &failure).await?;
                Ok(false)
            }
        }
    }
}

/// Spawn the scheduler loop. Set the returned flag to stop after the
/// current cycle.
pub fn spawn_queue_sender(mut scheduler: OutboundScheduler) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Outbound scheduler started — pacing owned by the throttle ledger");
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Outbound scheduler shutting down");
                return;
            }
            let sleep = scheduler.run_cycle().await;
            debug!(sleep_secs = sleep.as_secs(), "Cycle complete");
            tokio::time::sleep(sleep).await;
        }
    });

    (handle, shutdown_flag)
}
