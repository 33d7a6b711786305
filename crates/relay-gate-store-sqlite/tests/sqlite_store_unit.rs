// crates/relay-gate-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Tests for the SQLite-backed state store.
// Purpose: Exercise CAS claims, index queries, monotonicity, and reopen.
// Dependencies: relay-gate-store-sqlite, relay-gate-core, tempfile, serde_json
// ============================================================================
//! ## Overview
//! Validates store semantics the workers depend on: insertion-ordered
//! matching candidates, atomic default swaps, checkpoint monotonicity,
//! claim-once DLQ and scheduler queries, and durability across reopen.

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

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use relay_gate_core::ActionConfig;
use relay_gate_core::CheckpointStore;
use relay_gate_core::DeliveryError;
use relay_gate_core::Direction;
use relay_gate_core::DlqEntry;
use relay_gate_core::DlqId;
use relay_gate_core::DlqStatus;
use relay_gate_core::DlqStore;
use relay_gate_core::ErrorCategory;
use relay_gate_core::ExecutionLog;
use relay_gate_core::ExecutionLogStore;
use relay_gate_core::HttpMethod;
use relay_gate_core::IntegrationConfig;
use relay_gate_core::IntegrationId;
use relay_gate_core::IntegrationStore;
use relay_gate_core::LogStatus;
use relay_gate_core::MessageId;
use relay_gate_core::OrgId;
use relay_gate_core::OutgoingAuth;
use relay_gate_core::RateLimitPolicy;
use relay_gate_core::RateLimitStore;
use relay_gate_core::Scope;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::SourceType;
use relay_gate_core::StepStatus;
use relay_gate_core::Timestamp;
use relay_gate_core::TraceId;
use relay_gate_core::TraceStep;
use relay_gate_core::Transformation;
use relay_gate_core::TriggerKind;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::LogCompletion;
use relay_gate_core::interfaces::StoreError;
use relay_gate_store_sqlite::SqliteStateStore;
use relay_gate_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use tempfile::tempdir;

fn integration(org: i32, name: &str, id: &str) -> IntegrationConfig {
    IntegrationConfig {
        id: IntegrationId::new(id),
        org_id: OrgId::new(org),
        integration_name: name.to_string(),
        version: None,
        is_default: true,
        direction: Direction::Outbound,
        event_type: "*".to_string(),
        scope: Scope::AllEntities,
        excluded_entity_rids: BTreeSet::new(),
        actions: vec![ActionConfig {
            target_url: "https://ex.test/hook".to_string(),
            http_method: HttpMethod::Post,
            headers: BTreeMap::new(),
            auth: OutgoingAuth::None,
            transformation: Transformation::passthrough(),
            condition: None,
        }],
        timeout_ms: 5_000,
        retry_count: 1,
        multi_action_delay_ms: 0,
        halt_on_error: false,
        rate_limits: RateLimitPolicy::disabled(),
        signing_enabled: false,
        signing_secrets: Vec::new(),
        is_active: true,
        created_at: Timestamp::from_unix_millis(1_000),
        updated_at: Timestamp::from_unix_millis(1_000),
    }
}

fn pending_log(org: i32, trace: &str, integration_id: &str, started_at: i64) -> ExecutionLog {
    ExecutionLog::begin(
        TraceId::new(trace),
        MessageId::new(format!("msg-{trace}")),
        OrgId::new(org),
        IntegrationId::new(integration_id),
        Direction::Outbound,
        TriggerKind::Event,
        event_fingerprint(OrgId::new(org), "polling_sql", trace).unwrap(),
        Timestamp::from_unix_millis(started_at),
    )
}

fn dlq_entry(id: &str, org: i32, next_retry_at: i64) -> DlqEntry {
    DlqEntry {
        dlq_id: DlqId::new(id),
        org_id: OrgId::new(org),
        integration_id: IntegrationId::new("int-a"),
        action_index: 0,
        trace_id: TraceId::new(format!("trace-{id}")),
        payload: json!({"k": 1}),
        error: DeliveryError::with_status(
            ErrorCategory::ServerError,
            "http_status",
            503,
            "upstream unavailable",
        ),
        retry_count: 0,
        max_retries: 5,
        next_retry_at: Timestamp::from_unix_millis(next_retry_at),
        status: DlqStatus::PendingRetry,
        failed_at: Timestamp::from_unix_millis(1_000),
        notes: None,
    }
}

fn open_store(dir: &tempfile::TempDir) -> SqliteStateStore {
    let config = SqliteStoreConfig::at(dir.path().join("state.db"));
    SqliteStateStore::new(&config).unwrap()
}

#[test]
fn integrations_round_trip_in_insertion_order() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let org = OrgId::new(1);

    store.upsert_integration(&integration(1, "billing", "int-1")).unwrap();
    store.upsert_integration(&integration(1, "audit", "int-2")).unwrap();
    store.upsert_integration(&integration(1, "crm", "int-3")).unwrap();

    let listed = store.active_outbound_defaults(org).unwrap();
    let ids: Vec<&str> = listed.iter().map(|config| config.id.as_str()).collect();
    assert_eq!(ids, vec!["int-1", "int-2", "int-3"]);

    // Upserting an existing row keeps its position.
    let mut updated = integration(1, "billing", "int-1");
    updated.event_type = "invoice.created".to_string();
    store.upsert_integration(&updated).unwrap();
    let listed = store.active_outbound_defaults(org).unwrap();
    assert_eq!(listed[0].event_type, "invoice.created");
    assert_eq!(listed.len(), 3);
}

#[test]
fn version_counter_moves_on_every_write() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let org = OrgId::new(1);
    assert_eq!(store.integrations_version(org).unwrap(), 0);
    store.upsert_integration(&integration(1, "billing", "int-1")).unwrap();
    assert_eq!(store.integrations_version(org).unwrap(), 1);
    store.upsert_integration(&integration(1, "billing", "int-1")).unwrap();
    assert_eq!(store.integrations_version(org).unwrap(), 2);
}

#[test]
fn default_swap_is_exclusive_per_name() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let org = OrgId::new(1);

    let mut v1 = integration(1, "billing", "int-v1");
    v1.version = Some("1.0.0".to_string());
    let mut v2 = integration(1, "billing", "int-v2");
    v2.version = Some("2.0.0".to_string());
    v2.is_default = false;
    store.upsert_integration(&v1).unwrap();
    store.upsert_integration(&v2).unwrap();

    store.swap_default_version(org, "billing", &IntegrationId::new("int-v2")).unwrap();

    let defaults = store.active_outbound_defaults(org).unwrap();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id.as_str(), "int-v2");
    let v1_loaded = store.integration(org, &IntegrationId::new("int-v1")).unwrap().unwrap();
    assert!(!v1_loaded.is_default);

    // Swapping to a missing version fails without side effects.
    let missing = store.swap_default_version(org, "billing", &IntegrationId::new("int-v9"));
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
    let defaults = store.active_outbound_defaults(org).unwrap();
    assert_eq!(defaults[0].id.as_str(), "int-v2");
}

#[test]
fn checkpoints_are_monotonic_and_survive_reopen() {
    let dir = tempdir().unwrap();
    let org = OrgId::new(7);
    {
        let store = open_store(&dir);
        store
            .advance_checkpoint(org, SourceType::PollingSql, &SourceCheckpoint::RowId {
                last_row_id: 10,
            })
            .unwrap();
        store
            .advance_checkpoint(org, SourceType::PollingSql, &SourceCheckpoint::RowId {
                last_row_id: 25,
            })
            .unwrap();
        let regression = store.advance_checkpoint(org, SourceType::PollingSql, &SourceCheckpoint::RowId {
            last_row_id: 5,
        });
        assert!(matches!(regression, Err(StoreError::Conflict(_))));
    }
    // A reopened store resumes from the committed cursor.
    let store = open_store(&dir);
    let checkpoint = store.checkpoint(org, SourceType::PollingSql).unwrap().unwrap();
    assert_eq!(checkpoint, SourceCheckpoint::RowId {
        last_row_id: 25,
    });
}

#[test]
fn stream_offsets_advance_per_partition() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let org = OrgId::new(7);
    let mut offsets = BTreeMap::new();
    offsets.insert(0, 5_i64);
    offsets.insert(1, 9_i64);
    store
        .advance_checkpoint(org, SourceType::Stream, &SourceCheckpoint::StreamOffsets {
            offsets: offsets.clone(),
        })
        .unwrap();

    // A regression on one partition is rejected.
    let mut regressed = offsets.clone();
    regressed.insert(1, 3_i64);
    let result = store.advance_checkpoint(org, SourceType::Stream, &SourceCheckpoint::StreamOffsets {
        offsets: regressed,
    });
    assert!(matches!(result, Err(StoreError::Conflict(_))));
}

#[test]
fn execution_logs_append_steps_and_complete() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let log = pending_log(1, "trace-1", "int-a", 10_000);
    store.insert_log(&log).unwrap();

    store
        .append_step(&log.trace_id, &TraceStep {
            name: "transform".to_string(),
            timestamp: Timestamp::from_unix_millis(10_050),
            duration_ms: 50,
            status: StepStatus::Success,
            metadata: serde_json::Value::Null,
        })
        .unwrap();
    store
        .complete_log(&log.trace_id, &LogCompletion {
            status: LogStatus::Success,
            finished_at: Timestamp::from_unix_millis(10_250),
            request: None,
            response: None,
            error: None,
        })
        .unwrap();

    let loaded = store.execution_log(&log.trace_id).unwrap().unwrap();
    assert_eq!(loaded.status, LogStatus::Success);
    assert_eq!(loaded.duration_ms, Some(250));
    assert_eq!(loaded.steps.len(), 1);
    assert!(
        store.has_terminal_log(log.org_id, &loaded.fingerprint, &loaded.integration_id).unwrap()
    );
}

#[test]
fn recent_logs_are_newest_first_and_purgeable() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    for (trace, started) in [("t-1", 1_000), ("t-2", 3_000), ("t-3", 2_000)] {
        store.insert_log(&pending_log(1, trace, "int-a", started)).unwrap();
    }
    let recent = store.recent_logs(OrgId::new(1), 2).unwrap();
    let traces: Vec<&str> = recent.iter().map(|log| log.trace_id.as_str()).collect();
    assert_eq!(traces, vec!["t-2", "t-3"]);

    let removed = store.purge_logs_before(Timestamp::from_unix_millis(2_500)).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.recent_logs(OrgId::new(1), 10).unwrap().len(), 1);
}

#[test]
fn dlq_claims_are_exclusive_and_ordered() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    store.insert_dlq(&dlq_entry("d-1", 1, 1_000)).unwrap();
    store.insert_dlq(&dlq_entry("d-2", 1, 500)).unwrap();
    store.insert_dlq(&dlq_entry("d-3", 1, 9_000)).unwrap();

    let now = Timestamp::from_unix_millis(2_000);
    let claimed = store.claim_due_dlq(now, 10).unwrap();
    let ids: Vec<&str> = claimed.iter().map(|entry| entry.dlq_id.as_str()).collect();
    assert_eq!(ids, vec!["d-2", "d-1"]);
    assert!(claimed.iter().all(|entry| entry.status == DlqStatus::Retrying));

    // A second claim finds nothing until entries are rescheduled.
    assert!(store.claim_due_dlq(now, 10).unwrap().is_empty());
    assert_eq!(store.pending_dlq_count(None).unwrap(), 1);
}

#[test]
fn dlq_manual_operations_round_trip() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    store.insert_dlq(&dlq_entry("d-1", 1, 900_000)).unwrap();
    let id = DlqId::new("d-1");

    // Force-retry makes the entry due immediately.
    store.force_retry_dlq(&id, Timestamp::from_unix_millis(2_000)).unwrap();
    let claimed = store.claim_due_dlq(Timestamp::from_unix_millis(2_000), 10).unwrap();
    assert_eq!(claimed.len(), 1);

    store
        .reschedule_dlq(
            &id,
            1,
            Timestamp::from_unix_millis(10_000),
            &DeliveryError::new(ErrorCategory::Network, "connect", "connection refused"),
        )
        .unwrap();
    let entry = store.dlq_entry(&id).unwrap().unwrap();
    assert_eq!(entry.retry_count, 1);
    assert_eq!(entry.status, DlqStatus::PendingRetry);

    store.abandon_dlq(&id, Some("gave up after incident 42")).unwrap();
    let entry = store.dlq_entry(&id).unwrap().unwrap();
    assert_eq!(entry.status, DlqStatus::Abandoned);
    assert_eq!(entry.notes.as_deref(), Some("gave up after incident 42"));

    store.delete_dlq(&id).unwrap();
    assert!(store.dlq_entry(&id).unwrap().is_none());
    assert!(matches!(store.delete_dlq(&id), Err(StoreError::NotFound(_))));
}

#[test]
fn rate_limit_windows_count_atomically_and_expire() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let integration = IntegrationId::new("int-rl");
    let start = Timestamp::from_unix_millis(120_000);
    let end = Timestamp::from_unix_millis(240_000);

    for expected in 1..=4_u32 {
        assert_eq!(store.increment_window(&integration, start, end).unwrap(), expected);
    }
    // Another window counts independently.
    let other_start = Timestamp::from_unix_millis(240_000);
    assert_eq!(
        store
            .increment_window(&integration, other_start, Timestamp::from_unix_millis(360_000))
            .unwrap(),
        1
    );

    let purged = store.purge_windows_before(Timestamp::from_unix_millis(240_000)).unwrap();
    assert_eq!(purged, 1);
}

#[test]
fn pending_deliveries_claim_once() {
    use relay_gate_core::DeliveryId;
    use relay_gate_core::DeliverySchedule;
    use relay_gate_core::PendingDelivery;
    use relay_gate_core::PendingDeliveryStore;
    use relay_gate_core::PendingStatus;

    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let delivery = PendingDelivery {
        id: DeliveryId::new("pd-1"),
        org_id: OrgId::new(1),
        integration_id: IntegrationId::new("int-a"),
        action_index: None,
        payload: json!({"k": 1}),
        schedule: DeliverySchedule::Delayed,
        scheduled_for: Timestamp::from_unix_millis(5_000),
        status: PendingStatus::Pending,
        attempt: 0,
        occurrences: 0,
        created_at: Timestamp::from_unix_millis(1_000),
    };
    store.insert_pending(&delivery).unwrap();

    assert!(store.claim_due_pending(Timestamp::from_unix_millis(4_000), 10).unwrap().is_empty());
    let claimed = store.claim_due_pending(Timestamp::from_unix_millis(5_000), 10).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempt, 1);
    assert!(store.claim_due_pending(Timestamp::from_unix_millis(5_000), 10).unwrap().is_empty());

    store.finish_pending(&delivery.id, PendingStatus::Done).unwrap();
    store.reschedule_pending(&delivery.id, Timestamp::from_unix_millis(9_000), 1).unwrap();
    let reclaimed = store.claim_due_pending(Timestamp::from_unix_millis(9_500), 10).unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].occurrences, 1);
}

#[test]
fn lookup_tables_persist_usage_counters() {
    use relay_gate_core::LookupEntry;
    use relay_gate_core::LookupStore;
    use relay_gate_core::LookupTable;

    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let mut entries = BTreeMap::new();
    entries.insert("src-1".to_string(), LookupEntry {
        target: "tgt-1".to_string(),
        label: Some("Target One".to_string()),
    });
    let table = LookupTable {
        org_id: OrgId::new(1),
        name: "ids".to_string(),
        entries,
        hits: 0,
        misses: 0,
        updated_at: Timestamp::from_unix_millis(1_000),
    };
    store.upsert_lookup_table(&table).unwrap();
    store.record_lookup_usage(OrgId::new(1), "ids", 3, 1).unwrap();

    let loaded = store.lookup_table(OrgId::new(1), "ids").unwrap().unwrap();
    assert_eq!(loaded.hits, 3);
    assert_eq!(loaded.misses, 1);
    assert_eq!(loaded.resolve("src-1"), Some("tgt-1"));
}
