// crates/relay-gate-workers/tests/job_worker.rs
// ============================================================================
// Module: Scheduled Job Tests
// Description: Tests for CRON/INTERVAL jobs and run logging.
// Purpose: Exercise fetch-transform-deliver and next-run computation.
// Dependencies: relay-gate-workers, relay-gate-core, rusqlite, tempfile
// ============================================================================
//! ## Overview
//! Runs a SQL-backed job end to end against a scripted dispatcher and
//! checks the run log, the redacted curl command, and timezone-aware
//! next-run advancement. Missed CRON windows collapse into the next
//! occurrence.

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

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::MockDispatcher;
use common::TestAuthBuilder;
use common::ok_response;
use common::status_failure;
use relay_gate_core::Clock;
use relay_gate_core::ErrorCategory;
use relay_gate_core::FieldMapping;
use relay_gate_core::HttpMethod;
use relay_gate_core::JobDataSource;
use relay_gate_core::JobId;
use relay_gate_core::JobTrigger;
use relay_gate_core::ManualClock;
use relay_gate_core::MemoryStateStore;
use relay_gate_core::NoScriptEvaluator;
use relay_gate_core::NoopMetrics;
use relay_gate_core::NoopSystemLog;
use relay_gate_core::OrgId;
use relay_gate_core::OutgoingAuth;
use relay_gate_core::ScheduledJob;
use relay_gate_core::Timestamp;
use relay_gate_core::Transformation;
use relay_gate_core::interfaces::ScheduledJobStore;
use relay_gate_core::runtime::TransformExecutor;
use relay_gate_workers::JobWorkerSettings;
use relay_gate_workers::ScheduledJobWorker;
use relay_gate_workers::StoreLookupResolver;
use relay_gate_workers::build_curl_command;
use relay_gate_workers::next_run_after;

/// 2024-01-15T09:00:05Z.
const NOW_MS: i64 = 1_705_309_205_000;
/// 2024-01-16T09:00:00Z.
const NEXT_9AM_MS: i64 = 1_705_395_600_000;

fn seed_bills_db(dir: &tempfile::TempDir, rows: usize) -> String {
    let path = dir.path().join("bills.db");
    let connection = rusqlite::Connection::open(&path).unwrap();
    connection
        .execute_batch(
            "CREATE TABLE bills (bill_id INTEGER PRIMARY KEY, amount REAL NOT NULL);",
        )
        .unwrap();
    for index in 0..rows {
        connection
            .execute(
                "INSERT INTO bills (bill_id, amount) VALUES (?1, ?2)",
                rusqlite::params![i64::try_from(index).unwrap() + 1, 10.5],
            )
            .unwrap();
    }
    path.to_string_lossy().into_owned()
}

fn sql_job(database_path: String) -> ScheduledJob {
    ScheduledJob {
        job_id: JobId::new("job-bills"),
        org_id: OrgId::new(1),
        name: "nightly bills export".to_string(),
        trigger: JobTrigger::Cron {
            expression: "0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
        },
        data_source: JobDataSource::Sql {
            database_path,
            query: "SELECT bill_id, amount FROM bills ORDER BY bill_id".to_string(),
        },
        transformation: Transformation::Simple {
            mappings: vec![FieldMapping {
                source: "data".to_string(),
                target: "bills".to_string(),
                formatter: None,
                lookup: None,
            }],
        },
        target_url: "https://billing.ex.test/import".to_string(),
        http_method: HttpMethod::Post,
        headers: BTreeMap::new(),
        auth: OutgoingAuth::Bearer {
            token: "job-token".to_string(),
        },
        timeout_ms: 10_000,
        is_active: true,
        last_run_at: None,
        next_run_at: Timestamp::from_unix_millis(NOW_MS - 5_000),
        created_at: Timestamp::from_unix_millis(1_000),
        updated_at: Timestamp::from_unix_millis(1_000),
    }
}

struct JobRig {
    store: Arc<MemoryStateStore>,
    clock: Arc<ManualClock>,
    dispatcher: Arc<MockDispatcher>,
    worker: ScheduledJobWorker,
}

fn job_rig(outcomes: Vec<relay_gate_core::interfaces::DispatchOutcome>) -> JobRig {
    let store = Arc::new(MemoryStateStore::new());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(NOW_MS)));
    let dispatcher = MockDispatcher::scripted(outcomes);
    let transforms = Arc::new(TransformExecutor::new(
        Arc::new(NoScriptEvaluator),
        Arc::new(StoreLookupResolver::new(
            Arc::clone(&store) as Arc<dyn relay_gate_core::StateStore>
        )),
    ));
    let worker = ScheduledJobWorker::new(
        Arc::clone(&store) as Arc<dyn relay_gate_core::StateStore>,
        Arc::clone(&dispatcher) as Arc<dyn relay_gate_core::RequestDispatcher>,
        Arc::new(TestAuthBuilder),
        transforms,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
        JobWorkerSettings {
            interval_ms: 1_000,
            fetch_budget_ms: 30_000,
            env: BTreeMap::new(),
        },
    );
    JobRig {
        store,
        clock,
        dispatcher,
        worker,
    }
}

#[tokio::test]
async fn sql_job_runs_end_to_end_and_advances_in_timezone() {
    let dir = tempfile::tempdir().unwrap();
    let database_path = seed_bills_db(&dir, 25);
    let rig = job_rig(vec![ok_response(200)]);
    rig.store.upsert_job(&sql_job(database_path)).unwrap();

    assert_eq!(rig.worker.tick().await.unwrap(), 1);

    // The run log captures every stage.
    let logs = rig
        .store
        .query_documents("scheduled_job_logs", &BTreeMap::new(), 10)
        .unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.get("status").and_then(serde_json::Value::as_str), Some("SUCCESS"));
    assert_eq!(
        log.get("records_fetched").and_then(serde_json::Value::as_u64),
        Some(25)
    );
    assert_eq!(
        log.get("response_status").and_then(serde_json::Value::as_u64),
        Some(200)
    );
    let transformed = log
        .get("transformed_payload")
        .and_then(serde_json::Value::as_str)
        .unwrap();
    assert!(transformed.starts_with(r#"{"bills":["#));
    // The curl command reproduces the request with the token masked.
    let curl = log.get("curl_command").and_then(serde_json::Value::as_str).unwrap();
    assert!(curl.starts_with("curl -X POST 'https://billing.ex.test/import'"));
    assert!(curl.contains("Authorization: ***"));
    assert!(!curl.contains("job-token"));

    // The delivered body carries the mapped records.
    let request = &rig.dispatcher.recorded()[0];
    let body: serde_json::Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body.get("bills").and_then(serde_json::Value::as_array).unwrap().len(), 25);

    // next_run_at advanced to the next 09:00 in the job's timezone.
    let job = rig.store.job(&JobId::new("job-bills")).unwrap().unwrap();
    assert_eq!(job.next_run_at, Timestamp::from_unix_millis(NEXT_9AM_MS));
    assert_eq!(job.last_run_at, Some(rig.clock.now()));
}

#[tokio::test]
async fn failed_delivery_records_a_failed_run_and_still_advances() {
    let dir = tempfile::tempdir().unwrap();
    let database_path = seed_bills_db(&dir, 3);
    let rig = job_rig(vec![status_failure(500, ErrorCategory::ServerError)]);
    rig.store.upsert_job(&sql_job(database_path)).unwrap();

    assert_eq!(rig.worker.tick().await.unwrap(), 1);

    let logs = rig
        .store
        .query_documents("scheduled_job_logs", &BTreeMap::new(), 10)
        .unwrap();
    let log = &logs[0];
    assert_eq!(log.get("status").and_then(serde_json::Value::as_str), Some("FAILED"));
    assert!(log.get("error").is_some());

    // Missed windows do not catch up; the schedule still advances.
    let job = rig.store.job(&JobId::new("job-bills")).unwrap().unwrap();
    assert_eq!(job.next_run_at, Timestamp::from_unix_millis(NEXT_9AM_MS));
}

#[tokio::test]
async fn interval_jobs_advance_from_the_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let database_path = seed_bills_db(&dir, 1);
    let rig = job_rig(vec![ok_response(200)]);
    let mut job = sql_job(database_path);
    job.trigger = JobTrigger::Interval {
        interval_ms: 120_000,
    };
    rig.store.upsert_job(&job).unwrap();

    assert_eq!(rig.worker.tick().await.unwrap(), 1);
    let stored = rig.store.job(&JobId::new("job-bills")).unwrap().unwrap();
    assert_eq!(
        stored.next_run_at,
        rig.clock.now().saturating_add_millis(120_000)
    );
}

#[test]
fn five_field_cron_expressions_evaluate_in_timezone() {
    let trigger = JobTrigger::Cron {
        expression: "0 9 * * *".to_string(),
        timezone: "Europe/Berlin".to_string(),
    };
    // 2024-06-01T12:00:00Z; Berlin is UTC+2 in June, so the next 09:00
    // local run lands at 07:00 UTC the following day.
    let after = Timestamp::from_unix_millis(1_717_243_200_000);
    let next = next_run_after(&trigger, after).unwrap();
    assert_eq!(next.as_unix_millis(), 1_717_311_600_000);
}

#[test]
fn invalid_schedules_surface_errors() {
    let bad_expression = JobTrigger::Cron {
        expression: "not a cron".to_string(),
        timezone: "UTC".to_string(),
    };
    assert!(next_run_after(&bad_expression, Timestamp::from_unix_millis(0)).is_err());

    let bad_timezone = JobTrigger::Cron {
        expression: "0 9 * * *".to_string(),
        timezone: "Mars/Olympus".to_string(),
    };
    assert!(next_run_after(&bad_timezone, Timestamp::from_unix_millis(0)).is_err());
}

#[test]
fn curl_commands_quote_bodies() {
    let mut headers = BTreeMap::new();
    headers.insert("X-Api-Version".to_string(), "3".to_string());
    let command = build_curl_command(
        "POST",
        "https://ex.test/import",
        &headers,
        Some(r#"{"note":"it's fine"}"#),
    );
    assert_eq!(
        command,
        "curl -X POST 'https://ex.test/import' -H 'X-Api-Version: 3' -d '{\"note\":\"it'\\''s fine\"}'"
    );
}
