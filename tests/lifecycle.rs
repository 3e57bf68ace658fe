//! End-to-end lifecycle tests: scheduler and inbound pipeline cycles
//! against the in-memory Registry and scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{
    MemoryRegistry, ScriptedConnector, ScriptedTransport, group, sendable_record,
    single_group_config,
};
use outreach::config::{GroupsConfig, ThrottleConfig};
use outreach::error::TransportError;
use outreach::inbound::InboundPipeline;
use outreach::outbound::OutboundScheduler;
use outreach::registry::rows::{RecordStatus, field, inbound_field};
use outreach::registry::value::FieldValue;
use outreach::registry::Registry;
use outreach::transport::{MailboxConnector, ParsedMessage};

const SENDER: &str = "alice@company.com";

fn harness() -> (
    Arc<MemoryRegistry>,
    Arc<ScriptedTransport>,
    Arc<ScriptedConnector>,
    GroupsConfig,
) {
    let registry = MemoryRegistry::new();
    registry.add_credential(SENDER, "refresh-token");
    let transport = ScriptedTransport::new();
    let connector = ScriptedConnector::new(Arc::clone(&transport));
    let config = single_group_config(&[SENDER]);
    (registry, transport, connector, config)
}

fn scheduler(
    registry: &Arc<MemoryRegistry>,
    connector: &Arc<ScriptedConnector>,
    config: &GroupsConfig,
) -> OutboundScheduler {
    let registry: Arc<dyn Registry> = Arc::clone(registry) as Arc<dyn Registry>;
    let connector: Arc<dyn MailboxConnector> = Arc::clone(connector) as Arc<dyn MailboxConnector>;
    OutboundScheduler::new(
        registry,
        connector,
        config.groups.clone(),
        ThrottleConfig::from_values(180, 300, 10, 50),
        config.clamped_batch_size(),
    )
    .with_seed(7)
}

fn pipeline(
    registry: &Arc<MemoryRegistry>,
    connector: &Arc<ScriptedConnector>,
    config: GroupsConfig,
) -> InboundPipeline {
    InboundPipeline::new(
        Arc::clone(registry) as Arc<dyn Registry>,
        Arc::clone(connector) as Arc<dyn MailboxConnector>,
        config,
    )
}

fn reply(message_id: &str, thread_id: &str, from: &str, subject: &str, body: &str) -> ParsedMessage {
    let mut msg = ParsedMessage::for_tests(from, subject, body);
    msg.message_id = message_id.to_string();
    msg.thread_id = thread_id.to_string();
    msg.is_mailer_daemon =
        from.to_lowercase().contains("mailer-daemon") || from.to_lowercase().contains("postmaster");
    msg
}

// ── Outbound ────────────────────────────────────────────────────────

#[tokio::test]
async fn one_cycle_cold_send_completes_record_and_ledger() {
    let (registry, transport, connector, config) = harness();
    registry.insert_record(
        "records",
        "rec-1",
        sendable_record("lead@example.com", "Intro", "Hello!", SENDER),
    );

    let mut scheduler = scheduler(&registry, &connector, &config);
    let before = Utc::now();
    let sleep = scheduler.run_cycle().await;

    // Record transitions to Done with both identifiers set together.
    let record = registry.record("rec-1");
    assert_eq!(record.status, RecordStatus::Done);
    assert_eq!(record.thread_id.as_deref(), Some("thr-1"));
    assert_eq!(record.message_id_last.as_deref(), Some("msg-1"));
    assert!(record.sent_at_last.is_some());
    assert!(!record.needs_review);

    // The wire message was cold: no thread id, no reply headers.
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, SENDER);
    assert_eq!(sent[0].to, "lead@example.com");
    assert!(sent[0].thread_id.is_none());
    assert!(sent[0].in_reply_to.is_none());
    drop(sent);

    // Ledger: one send this hour, next eligibility in the future with
    // jitter inside the configured interval.
    let entry = scheduler.ledger().get(SENDER).unwrap();
    assert_eq!(entry.count_this_hour, 1);
    assert_eq!(entry.count_this_day, 1);
    assert!(entry.next_eligible > before);

    // The cycle sleeps until this sender is eligible again.
    assert!(sleep >= Duration::from_secs(1));
    assert!(sleep <= Duration::from_secs(300));
}

#[tokio::test]
async fn one_send_per_sender_per_cycle() {
    let (registry, transport, connector, config) = harness();
    registry.insert_record(
        "records",
        "rec-1",
        sendable_record("first@example.com", "One", "Body", SENDER),
    );
    registry.insert_record(
        "records",
        "rec-2",
        sendable_record("second@example.com", "Two", "Body", SENDER),
    );

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    // Only the earliest-queued record goes out.
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(transport.sent.lock().unwrap()[0].to, "first@example.com");
    assert_eq!(registry.record("rec-1").status, RecordStatus::Done);
    assert_eq!(registry.record("rec-2").status, RecordStatus::Pending);

    // The next cycle runs immediately; the sender is inside its jitter
    // window, so nothing more is sent.
    scheduler.run_cycle().await;
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(registry.record("rec-2").status, RecordStatus::Pending);
}

#[tokio::test]
async fn followup_reuses_thread_and_references_prior_message() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("lead@example.com", "Re: Intro", "Bumping this", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-9".into()));
    fields.insert(
        field::MESSAGE_ID_LAST.into(),
        FieldValue::Text("prior-msg".into()),
    );
    registry.insert_record("records", "rec-1", fields);

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].thread_id.as_deref(), Some("thr-9"));
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("prior-msg"));
    drop(sent);

    let record = registry.record("rec-1");
    assert_eq!(record.status, RecordStatus::Done);
    assert_eq!(record.thread_id.as_deref(), Some("thr-9"));
    assert_eq!(record.message_id_last.as_deref(), Some("msg-1"));
}

#[tokio::test]
async fn followup_without_prior_message_id_is_flagged_not_sent() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("lead@example.com", "Re: Intro", "Bump", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-9".into()));
    registry.insert_record("records", "rec-1", fields);

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    assert_eq!(transport.sent_count(), 0);
    let record = registry.record("rec-1");
    assert!(record.needs_review);
    assert!(!record.stopped);
    assert_eq!(record.status, RecordStatus::Pending);
}

#[tokio::test]
async fn missing_credential_flags_record_for_review() {
    let (registry, transport, connector, config) = harness();
    registry.insert_record(
        "records",
        "rec-1",
        sendable_record("lead@example.com", "Intro", "Hello", "ghost@company.com"),
    );

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    assert_eq!(transport.sent_count(), 0);
    let record = registry.record("rec-1");
    assert!(record.needs_review);
    assert_eq!(record.status, RecordStatus::Pending);
    let reason = registry
        .record_field("rec-1", field::STOP_REASON)
        .and_then(|v| v.as_text().map(str::to_string))
        .unwrap();
    assert!(reason.contains("ghost@company.com"));
}

#[tokio::test]
async fn permanent_send_failure_stops_record() {
    let (registry, transport, connector, config) = harness();
    registry.insert_record(
        "records",
        "rec-1",
        sendable_record("bad@@example.com", "Intro", "Hello", SENDER),
    );
    transport.script_send_error(TransportError::Http {
        status: 400,
        message: "Invalid To header".into(),
    });

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    let record = registry.record("rec-1");
    assert!(record.needs_review);
    assert!(record.stopped);
    assert_eq!(record.status, RecordStatus::Pending);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_exhaustion_leaves_record_pending_for_review() {
    let (registry, transport, connector, config) = harness();
    registry.insert_record(
        "records",
        "rec-1",
        sendable_record("lead@example.com", "Intro", "Hello", SENDER),
    );
    for _ in 0..3 {
        transport.script_send_error(TransportError::Network("connection reset".into()));
    }

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    let record = registry.record("rec-1");
    assert!(record.needs_review);
    assert!(!record.stopped, "transient exhaustion must not stop the record");
    assert_eq!(record.status, RecordStatus::Pending);
}

#[tokio::test]
async fn record_failure_does_not_block_other_senders() {
    let (registry, transport, connector, config) = harness();
    registry.add_credential("bob@company.com", "refresh-token-2");
    registry.insert_record(
        "records",
        "rec-1",
        sendable_record("lead@example.com", "One", "Body", "ghost@company.com"),
    );
    registry.insert_record(
        "records",
        "rec-2",
        sendable_record("other@example.com", "Two", "Body", "bob@company.com"),
    );

    let mut scheduler = scheduler(&registry, &connector, &config);
    scheduler.run_cycle().await;

    assert!(registry.record("rec-1").needs_review);
    assert_eq!(registry.record("rec-2").status, RecordStatus::Done);
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn idle_cycle_uses_short_idle_sleep() {
    let (registry, _transport, connector, config) = harness();
    let mut scheduler = scheduler(&registry, &connector, &config);
    let sleep = scheduler.run_cycle().await;
    assert_eq!(sleep, Duration::from_secs(60));
}

// ── Inbound ─────────────────────────────────────────────────────────

#[tokio::test]
async fn same_message_id_is_recorded_exactly_once() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("lead@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-1".into()));
    registry.insert_record("records", "rec-1", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-1",
        "lead@example.com",
        "Re: Intro",
        "Sounds good!\nOn Mon, Jan 1, 2024, us wrote:\n> pitch",
    ));

    let pipeline = pipeline(&registry, &connector, config);
    pipeline.run_cycle().await;
    pipeline.run_cycle().await;

    assert_eq!(registry.inbound_rows("inbound").len(), 1);
}

#[tokio::test]
async fn human_reply_marks_record_replied() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("lead@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-1".into()));
    registry.insert_record("records", "rec-1", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-1",
        "lead@example.com",
        "Re: Intro",
        "Happy to chat next week.\n\nOn Mon, Jan 1, 2024, us wrote:\n> pitch",
    ));

    pipeline(&registry, &connector, config).run_cycle().await;

    let record = registry.record("rec-1");
    assert_eq!(record.status, RecordStatus::Replied);
    assert!(!record.stopped);

    let rows = registry.inbound_rows("inbound");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0][inbound_field::CLASSIFICATION].as_select_like(),
        Some("Human Reply")
    );
    assert_eq!(
        rows[0][inbound_field::NEEDS_REVIEW].as_checkbox(),
        Some(false)
    );
    assert_eq!(
        rows[0][inbound_field::RECORD].as_relation(),
        Some(&["rec-1".to_string()][..])
    );
}

#[tokio::test]
async fn strong_unsubscribe_stop_losses_record() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("lead@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-1".into()));
    fields.insert(
        field::PLANNED_SEND_AT.into(),
        FieldValue::Date(Some(Utc::now())),
    );
    registry.insert_record("records", "rec-1", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-1",
        "lead@example.com",
        "Re: Intro",
        "STOP\n\nOn Mon, Jan 1, 2024, us wrote:\n> pitch",
    ));

    pipeline(&registry, &connector, config).run_cycle().await;

    let record = registry.record("rec-1");
    assert!(record.stopped);
    assert!(record.unsubscribed);
    assert!(!record.bounced);
    assert_eq!(record.status, RecordStatus::Stopped);
    // The pending next-send hint is cleared so nothing re-selects it.
    assert_eq!(
        registry.record_field("rec-1", field::PLANNED_SEND_AT),
        Some(FieldValue::Date(None))
    );

    let rows = registry.inbound_rows("inbound");
    assert_eq!(
        rows[0][inbound_field::CLASSIFICATION].as_select_like(),
        Some("Unsubscribe")
    );
}

#[tokio::test]
async fn weak_unsubscribe_stops_but_needs_review() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("lead@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-1".into()));
    registry.insert_record("records", "rec-1", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-1",
        "lead@example.com",
        "Re: Intro",
        "not interested, please stop",
    ));

    pipeline(&registry, &connector, config).run_cycle().await;

    let record = registry.record("rec-1");
    assert!(record.stopped);
    assert!(record.unsubscribed);
    let rows = registry.inbound_rows("inbound");
    assert_eq!(
        rows[0][inbound_field::NEEDS_REVIEW].as_checkbox(),
        Some(true)
    );
}

#[tokio::test]
async fn hard_bounce_stop_losses_record() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("gone@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-1".into()));
    registry.insert_record("records", "rec-1", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-1",
        "Mail Delivery Subsystem <mailer-daemon@googlemail.com>",
        "Delivery Status Notification (Failure)",
        "550 5.1.1 user unknown",
    ));

    pipeline(&registry, &connector, config).run_cycle().await;

    let record = registry.record("rec-1");
    assert!(record.stopped);
    assert!(record.bounced);
    assert!(!record.unsubscribed);
    assert_eq!(record.status, RecordStatus::Stopped);
    let rows = registry.inbound_rows("inbound");
    assert_eq!(
        rows[0][inbound_field::CLASSIFICATION].as_select_like(),
        Some("Bounce Hard")
    );
}

#[tokio::test]
async fn soft_bounce_does_not_stop_record() {
    let (registry, transport, connector, config) = harness();
    let mut fields = sendable_record("full@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-1".into()));
    registry.insert_record("records", "rec-1", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-1",
        "mailer-daemon@googlemail.com",
        "Delivery Status Notification (Delay)",
        "mailbox full, status: 4.2.2",
    ));

    pipeline(&registry, &connector, config).run_cycle().await;

    let record = registry.record("rec-1");
    assert!(!record.stopped);
    assert_eq!(record.status, RecordStatus::Replied);
    let rows = registry.inbound_rows("inbound");
    assert_eq!(
        rows[0][inbound_field::CLASSIFICATION].as_select_like(),
        Some("Bounce Soft")
    );
}

// ── Routing across groups ───────────────────────────────────────────

fn two_group_config() -> GroupsConfig {
    GroupsConfig {
        groups: vec![
            group("records-a", "inbound-a", "senders-a", &[SENDER]),
            group("records-b", "inbound-b", "senders-b", &[SENDER]),
        ],
        poll_interval_seconds: 120,
        body_max_chars: 40_000,
        batch_size: 100,
    }
}

#[tokio::test]
async fn routing_picks_the_group_with_exactly_one_match() {
    let registry = MemoryRegistry::new();
    registry.add_credential(SENDER, "refresh-token");
    let transport = ScriptedTransport::new();
    let connector = ScriptedConnector::new(Arc::clone(&transport));

    // Group A has no record on this thread; group B has exactly one.
    let mut fields = sendable_record("lead@example.com", "Intro", "Hello", SENDER);
    fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-7".into()));
    registry.insert_record("records-b", "rec-b", fields);
    transport.push_inbox(reply(
        "in-1",
        "thr-7",
        "lead@example.com",
        "Re: Intro",
        "Sure.\nOn Mon, us wrote:\n> pitch",
    ));

    pipeline(&registry, &connector, two_group_config())
        .run_cycle()
        .await;

    assert!(registry.inbound_rows("inbound-a").is_empty());
    assert_eq!(registry.inbound_rows("inbound-b").len(), 1);
    assert_eq!(registry.record("rec-b").status, RecordStatus::Replied);
}

#[tokio::test]
async fn ambiguous_routing_writes_nothing() {
    let registry = MemoryRegistry::new();
    registry.add_credential(SENDER, "refresh-token");
    let transport = ScriptedTransport::new();
    let connector = ScriptedConnector::new(Arc::clone(&transport));

    // One match in each group: no unique binding anywhere.
    for collection in ["records-a", "records-b"] {
        let mut fields = sendable_record("lead@example.com", "Intro", "Hello", SENDER);
        fields.insert(field::THREAD_ID.into(), FieldValue::Text("thr-7".into()));
        registry.insert_record(collection, &format!("rec-{collection}"), fields);
    }
    transport.push_inbox(reply(
        "in-1",
        "thr-7",
        "lead@example.com",
        "Re: Intro",
        "Sure.\nOn Mon, us wrote:\n> pitch",
    ));

    pipeline(&registry, &connector, two_group_config())
        .run_cycle()
        .await;

    assert!(registry.inbound_rows("inbound-a").is_empty());
    assert!(registry.inbound_rows("inbound-b").is_empty());
    assert_eq!(
        registry.record("rec-records-a").status,
        RecordStatus::Pending
    );
    assert_eq!(
        registry.record("rec-records-b").status,
        RecordStatus::Pending
    );
}
