// crates/relay-gate-sources/tests/source_tests.rs
// ============================================================================
// Module: Source Adapter Tests
// Description: Tests for polling-SQL, stream, and push adapters.
// Purpose: Exercise checkpoint-after-enqueue, skips, and auth semantics.
// Dependencies: relay-gate-sources, relay-gate-core, rusqlite, tempfile, tokio
// ============================================================================
//! ## Overview
//! Validates adapter resume semantics, corrupt-record skipping, consumer
//! offset bookkeeping, and push intake authentication.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use relay_gate_core::ColumnMapping;
use relay_gate_core::HttpPushSourceConfig;
use relay_gate_core::ManualClock;
use relay_gate_core::MemoryStateStore;
use relay_gate_core::NoopMetrics;
use relay_gate_core::NoopSystemLog;
use relay_gate_core::OrgId;
use relay_gate_core::PollingSqlSourceConfig;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::StreamSourceConfig;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::CheckpointStore;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::SourceType;
use relay_gate_sources::ChannelConsumer;
use relay_gate_sources::PollingSqlSource;
use relay_gate_sources::PushError;
use relay_gate_sources::PushIntake;
use relay_gate_sources::StreamSource;
use relay_gate_sources::consumer_group;
use relay_gate_sources::push_queue;
use rusqlite::Connection;
use tempfile::tempdir;

fn seed_tenant_db(path: &std::path::Path, rows: &[(i64, &str, &str)]) {
    let connection = Connection::open(path).unwrap();
    connection
        .execute_batch(
            "CREATE TABLE outbox (
                row_id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                entity TEXT,
                body TEXT NOT NULL
             );",
        )
        .unwrap();
    for (id, kind, body) in rows {
        connection
            .execute(
                "INSERT INTO outbox (row_id, kind, entity, body) VALUES (?1, ?2, NULL, ?3)",
                rusqlite::params![id, kind, body],
            )
            .unwrap();
    }
}

fn polling_config(path: &std::path::Path) -> PollingSqlSourceConfig {
    PollingSqlSourceConfig {
        database_path: path.to_string_lossy().into_owned(),
        table: "outbox".to_string(),
        columns: ColumnMapping {
            id: "row_id".to_string(),
            event_type: "kind".to_string(),
            entity_rid: Some("entity".to_string()),
            payload: "body".to_string(),
        },
        poll_interval_ms: 1_000,
        batch_size: 10,
        db_timeout_ms: 1_000,
        connection_limit: 2,
    }
}

fn polling_source(
    path: &std::path::Path,
    store: Arc<MemoryStateStore>,
) -> PollingSqlSource {
    PollingSqlSource::new(
        OrgId::new(1),
        polling_config(path),
        store,
        Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000))),
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
    )
}

#[tokio::test]
async fn polling_source_reads_past_committed_checkpoint() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("tenant.db");
    seed_tenant_db(&db_path, &[
        (1, "invoice.created", r#"{"total": 10}"#),
        (2, "invoice.created", r#"{"total": 20}"#),
        (3, "invoice.paid", r#"{"total": 20}"#),
    ]);
    let store = Arc::new(MemoryStateStore::new());
    let mut source = polling_source(&db_path, Arc::clone(&store));
    source.start().await.unwrap();

    let batch = source.next_batch().await.unwrap();
    assert_eq!(batch.events.len(), 3);
    assert_eq!(batch.events[0].source_event_id, "1");
    let checkpoint = batch.checkpoint.clone().unwrap();
    assert_eq!(checkpoint, SourceCheckpoint::RowId {
        last_row_id: 3,
    });

    // Without a commit, the same rows are re-read (at-least-once).
    let replay = source.next_batch().await.unwrap();
    assert_eq!(replay.events.len(), 3);

    source.commit(&checkpoint).await.unwrap();
    let after_commit = source.next_batch().await.unwrap();
    assert!(after_commit.events.is_empty());
    assert!(after_commit.checkpoint.is_none());
}

#[tokio::test]
async fn polling_source_resumes_from_stored_checkpoint() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("tenant.db");
    seed_tenant_db(&db_path, &[
        (1, "a", "{}"),
        (2, "b", "{}"),
        (3, "c", "{}"),
    ]);
    let store = Arc::new(MemoryStateStore::new());
    store
        .advance_checkpoint(OrgId::new(1), SourceType::PollingSql, &SourceCheckpoint::RowId {
            last_row_id: 2,
        })
        .unwrap();

    let mut source = polling_source(&db_path, store);
    source.start().await.unwrap();
    let batch = source.next_batch().await.unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].event_type, "c");
}

#[tokio::test]
async fn polling_source_skips_corrupt_rows_under_checkpoint() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("tenant.db");
    seed_tenant_db(&db_path, &[
        (1, "a", r#"{"ok": true}"#),
        (2, "b", "not json"),
        (3, "c", r#"{"ok": true}"#),
    ]);
    let store = Arc::new(MemoryStateStore::new());
    let mut source = polling_source(&db_path, store);
    source.start().await.unwrap();

    let batch = source.next_batch().await.unwrap();
    assert_eq!(batch.events.len(), 2);
    // The corrupt row is covered by the checkpoint so it is not re-read.
    assert_eq!(batch.checkpoint.unwrap(), SourceCheckpoint::RowId {
        last_row_id: 3,
    });
}

#[tokio::test]
async fn stream_source_commits_offsets_after_enqueue() {
    let (consumer, handle) = ChannelConsumer::new();
    handle.publish(0, br#"{"event_type": "X", "payload": {"k": 1}}"#.to_vec());
    handle.publish(0, br#"{"event_type": "Y", "payload": {"k": 2}}"#.to_vec());
    handle.publish(1, br#"{"event_type": "Z", "payload": {"k": 3}}"#.to_vec());

    let store = Arc::new(MemoryStateStore::new());
    let mut source = StreamSource::new(
        OrgId::new(4),
        StreamSourceConfig {
            topic: "tenant-events".to_string(),
            default_event_type: None,
        },
        Box::new(consumer),
        Arc::clone(&store) as Arc<dyn relay_gate_core::StateStore>,
        Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000))),
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
        50,
    );
    source.start().await.unwrap();

    let batch = source.next_batch().await.unwrap();
    assert_eq!(batch.events.len(), 3);
    let checkpoint = batch.checkpoint.clone().unwrap();

    // Nothing is committed until the worker says so.
    assert!(handle.committed().is_empty());
    source.commit(&checkpoint).await.unwrap();
    let committed = handle.committed();
    assert_eq!(committed.get(&0), Some(&2));
    assert_eq!(committed.get(&1), Some(&1));

    let stored = store.checkpoint(OrgId::new(4), SourceType::Stream).unwrap().unwrap();
    assert_eq!(stored, checkpoint);
}

#[tokio::test]
async fn stream_source_skips_unparseable_messages() {
    let (consumer, handle) = ChannelConsumer::new();
    handle.publish(0, b"not json".to_vec());
    handle.publish(0, br#"{"event_type": "X"}"#.to_vec());

    let store = Arc::new(MemoryStateStore::new());
    let mut source = StreamSource::new(
        OrgId::new(4),
        StreamSourceConfig {
            topic: "tenant-events".to_string(),
            default_event_type: None,
        },
        Box::new(consumer),
        store,
        Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000))),
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
        50,
    );
    source.start().await.unwrap();

    let batch = source.next_batch().await.unwrap();
    assert_eq!(batch.events.len(), 1);
    // The bad message's offset still advances.
    let SourceCheckpoint::StreamOffsets {
        offsets,
    } = batch.checkpoint.unwrap()
    else {
        panic!("expected stream offsets");
    };
    assert_eq!(offsets.get(&0), Some(&2));
}

#[test]
fn consumer_groups_isolate_tenants() {
    assert_eq!(consumer_group(OrgId::new(7), "orders"), "relay-gate-7-orders");
    assert_ne!(
        consumer_group(OrgId::new(7), "orders"),
        consumer_group(OrgId::new(8), "orders")
    );
}

#[tokio::test]
async fn push_intake_rejects_bad_secrets_and_accepts_good_ones() {
    let (sender, mut source) = push_queue(8);
    let intake = PushIntake::new(
        OrgId::new(9),
        HttpPushSourceConfig {
            secret_header: "X-Push-Secret".to_string(),
            shared_secret: "s3cret".to_string(),
            payload_schema: None,
        },
        sender,
        Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000))),
    );

    assert!(matches!(intake.accept(None, b"{}"), Err(PushError::Unauthorized)));
    assert!(matches!(intake.accept(Some("wrong"), b"{}"), Err(PushError::Unauthorized)));
    assert!(matches!(
        intake.accept(Some("s3cret"), b"not json"),
        Err(PushError::InvalidPayload(_))
    ));
    assert!(matches!(
        intake.accept(Some("s3cret"), br#"{"payload": {}}"#),
        Err(PushError::InvalidPayload(_))
    ));

    intake
        .accept(Some("s3cret"), br#"{"event_type": "X", "payload": {"k": 1}}"#)
        .unwrap();
    let batch = source.next_batch().await.unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].event_type, "X");
}

#[tokio::test]
async fn push_intake_validates_payload_schema() {
    let (sender, _source) = push_queue(8);
    let schema = serde_json::json!({
        "type": "object",
        "required": ["event_type", "payload"],
        "properties": {
            "payload": {
                "type": "object",
                "required": ["amount"]
            }
        }
    });
    let intake = PushIntake::new(
        OrgId::new(9),
        HttpPushSourceConfig {
            secret_header: "X-Push-Secret".to_string(),
            shared_secret: "s3cret".to_string(),
            payload_schema: Some(schema),
        },
        sender,
        Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000))),
    );

    assert!(matches!(
        intake.accept(Some("s3cret"), br#"{"event_type": "X", "payload": {}}"#),
        Err(PushError::InvalidPayload(_))
    ));
    intake
        .accept(Some("s3cret"), br#"{"event_type": "X", "payload": {"amount": 5}}"#)
        .unwrap();
}

#[tokio::test]
async fn push_queue_full_is_admission_rejection() {
    let (sender, _source) = push_queue(1);
    let intake = PushIntake::new(
        OrgId::new(9),
        HttpPushSourceConfig {
            secret_header: "X-Push-Secret".to_string(),
            shared_secret: "s3cret".to_string(),
            payload_schema: None,
        },
        sender,
        Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000))),
    );

    intake.accept(Some("s3cret"), br#"{"event_type": "X"}"#).unwrap();
    assert!(matches!(
        intake.accept(Some("s3cret"), br#"{"event_type": "Y"}"#),
        Err(PushError::RateLimited)
    ));
}
