// crates/relay-gate-workers/tests/worker_loops.rs
// ============================================================================
// Module: Worker Loop Tests
// Description: Tests for the delivery, scheduler, and DLQ worker ticks.
// Purpose: Exercise claim semantics, checkpointing, and retry promotion.
// Dependencies: relay-gate-workers, relay-gate-core
// ============================================================================
//! ## Overview
//! Drives single ticks of each worker over the in-memory store: source
//! batches deliver and checkpoint, scheduled rows fire and recur, and DLQ
//! entries resolve, reschedule with backoff, or abandon with an alert.

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

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use common::TestRig;
use common::event;
use common::integration;
use common::ok_response;
use common::rig;
use common::status_failure;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryId;
use relay_gate_core::DeliverySchedule;
use relay_gate_core::DlqStatus;
use relay_gate_core::ErrorCategory;
use relay_gate_core::IntegrationStore;
use relay_gate_core::LogStatus;
use relay_gate_core::NoopMetrics;
use relay_gate_core::NoopSystemLog;
use relay_gate_core::OrgId;
use relay_gate_core::PendingDelivery;
use relay_gate_core::PendingStatus;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::SourceType;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::AlertKind;
use relay_gate_core::interfaces::DlqStore;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::interfaces::ExecutionLogStore;
use relay_gate_core::interfaces::PendingDeliveryStore;
use relay_gate_core::interfaces::SourceBatch;
use relay_gate_core::interfaces::SourceError;
use relay_gate_core::runtime::MatcherCache;
use relay_gate_workers::AlertCenter;
use relay_gate_workers::DeliveryWorker;
use relay_gate_workers::DeliveryWorkerSettings;
use relay_gate_workers::DlqWorker;
use relay_gate_workers::DlqWorkerSettings;
use relay_gate_workers::SchedulerWorker;
use relay_gate_workers::SchedulerWorkerSettings;
use relay_gate_workers::abandon_entries;
use relay_gate_workers::delete_entries;
use relay_gate_workers::retry_entries;
use serde_json::json;

/// Scripted source replaying queued batches and recording commits.
struct ScriptedSource {
    /// Owning organization.
    org_id: OrgId,
    /// Batches returned in order.
    batches: Mutex<VecDeque<SourceBatch>>,
    /// Commits observed, shared with the test.
    committed: Arc<Mutex<Vec<SourceCheckpoint>>>,
}

impl ScriptedSource {
    fn boxed(
        org_id: i32,
        batches: Vec<SourceBatch>,
    ) -> (Box<dyn EventSource>, Arc<Mutex<Vec<SourceCheckpoint>>>) {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let source = Self {
            org_id: OrgId::new(org_id),
            batches: Mutex::new(batches.into()),
            committed: Arc::clone(&committed),
        };
        (Box::new(source), committed)
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn org_id(&self) -> OrgId {
        self.org_id
    }

    fn source_type(&self) -> SourceType {
        SourceType::PollingSql
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn stop(&mut self) {}

    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError> {
        Ok(self
            .batches
            .lock()
            .map_err(|_| SourceError::Fatal("poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(SourceBatch::empty))
    }

    async fn commit(&mut self, checkpoint: &SourceCheckpoint) -> Result<(), SourceError> {
        self.committed
            .lock()
            .map_err(|_| SourceError::Fatal("poisoned".to_string()))?
            .push(checkpoint.clone());
        Ok(())
    }
}

fn delivery_worker(rig: &TestRig) -> DeliveryWorker {
    DeliveryWorker::new(
        Arc::clone(&rig.pipeline),
        Arc::clone(&rig.store) as _,
        Arc::new(MatcherCache::new()),
        Arc::clone(&rig.clock) as Arc<dyn Clock>,
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
        Arc::new(AlertCenter::new(
            Arc::clone(&rig.alert_sink) as _,
            relay_gate_config::AlertConfig::default(),
        )),
        DeliveryWorkerSettings {
            interval_ms: 1_000,
            pool_size: 8,
            max_event_age_days: 7,
            log_retention_days: 30,
        },
    )
}

#[tokio::test]
async fn delivery_tick_matches_delivers_and_commits() {
    let rig = rig(vec![ok_response(200)]);
    rig.store.upsert_integration(&integration(1, "hook", "*")).unwrap();

    let batch = SourceBatch {
        events: vec![event(1, "X", "row-1")],
        checkpoint: Some(SourceCheckpoint::RowId {
            last_row_id: 1,
        }),
    };
    let (source, committed) = ScriptedSource::boxed(1, vec![batch]);
    let mut sources = vec![source];

    let worker = delivery_worker(&rig);
    let summary = worker.tick(&mut sources).await.unwrap();
    assert_eq!(summary.events, 1);
    assert_eq!(summary.runs, 1);

    // The checkpoint commits only after the batch was processed.
    assert_eq!(committed.lock().unwrap().as_slice(), &[SourceCheckpoint::RowId {
        last_row_id: 1,
    }]);
    let logs = rig.store.recent_logs(OrgId::new(1), 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Success);
}

#[tokio::test]
async fn delivery_tick_deduplicates_redelivered_batches() {
    let rig = rig(vec![ok_response(200), ok_response(200)]);
    rig.store.upsert_integration(&integration(1, "hook", "*")).unwrap();

    let make_batch = || SourceBatch {
        events: vec![event(1, "X", "row-1")],
        checkpoint: Some(SourceCheckpoint::RowId {
            last_row_id: 1,
        }),
    };
    let (source, _committed) = ScriptedSource::boxed(1, vec![make_batch(), make_batch()]);
    let mut sources = vec![source];

    let worker = delivery_worker(&rig);
    worker.tick(&mut sources).await.unwrap();
    worker.tick(&mut sources).await.unwrap();

    // At-least-once redelivery produced exactly one terminal log.
    let logs = rig.store.recent_logs(OrgId::new(1), 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(rig.dispatcher.recorded().len(), 1);
}

#[tokio::test]
async fn delivery_tick_drops_stale_events() {
    let rig = rig(vec![ok_response(200)]);
    rig.store.upsert_integration(&integration(1, "hook", "*")).unwrap();

    let mut stale = event(1, "X", "old-row");
    stale.produced_at = Timestamp::from_unix_millis(0);
    let (source, _) = ScriptedSource::boxed(1, vec![SourceBatch {
        events: vec![stale],
        checkpoint: None,
    }]);
    let mut sources = vec![source];

    let worker = delivery_worker(&rig);
    let summary = worker.tick(&mut sources).await.unwrap();
    assert_eq!(summary.dropped_stale, 1);
    assert_eq!(summary.runs, 0);
}

fn pending_row(rig: &TestRig, id: &str, schedule: DeliverySchedule) -> PendingDelivery {
    PendingDelivery {
        id: DeliveryId::new(id),
        org_id: OrgId::new(1),
        integration_id: relay_gate_core::IntegrationId::new("int-hook"),
        action_index: None,
        payload: json!({"k": 9}),
        schedule,
        scheduled_for: rig.clock.now(),
        status: PendingStatus::Pending,
        attempt: 0,
        occurrences: 0,
        created_at: rig.clock.now(),
    }
}

fn scheduler(rig: &TestRig) -> SchedulerWorker {
    SchedulerWorker::new(
        Arc::clone(&rig.pipeline),
        Arc::clone(&rig.store) as _,
        Arc::clone(&rig.clock) as Arc<dyn Clock>,
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
        SchedulerWorkerSettings {
            interval_ms: 1_000,
            batch_size: 50,
            pool_size: 8,
        },
    )
}

#[tokio::test]
async fn delayed_deliveries_fire_once() {
    let rig = rig(vec![ok_response(200)]);
    rig.store.upsert_integration(&integration(1, "hook", "*")).unwrap();
    rig.store.insert_pending(&pending_row(&rig, "pd-1", DeliverySchedule::Delayed)).unwrap();

    let worker = scheduler(&rig);
    assert_eq!(worker.tick().await.unwrap(), 1);
    // Nothing left to claim.
    assert_eq!(worker.tick().await.unwrap(), 0);

    let logs = rig.store.recent_logs(OrgId::new(1), 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Success);
}

#[tokio::test]
async fn recurring_deliveries_advance_until_budget() {
    let rig = rig(vec![ok_response(200), ok_response(200)]);
    rig.store.upsert_integration(&integration(1, "hook", "*")).unwrap();
    rig.store
        .insert_pending(&pending_row(&rig, "pd-1", DeliverySchedule::Recurring {
            interval_ms: 60_000,
            max_occurrences: Some(2),
            end_at: None,
        }))
        .unwrap();

    let worker = scheduler(&rig);
    assert_eq!(worker.tick().await.unwrap(), 1);

    // The next occurrence is not due until the interval elapses.
    assert_eq!(worker.tick().await.unwrap(), 0);
    rig.clock.advance_millis(60_000);
    assert_eq!(worker.tick().await.unwrap(), 1);

    // The occurrence budget is exhausted; no further firings.
    rig.clock.advance_millis(60_000);
    assert_eq!(worker.tick().await.unwrap(), 0);
    // Each occurrence produced its own trace.
    assert_eq!(rig.store.recent_logs(OrgId::new(1), 10).unwrap().len(), 2);
}

fn dlq_worker(rig: &TestRig) -> DlqWorker {
    DlqWorker::new(
        Arc::clone(&rig.pipeline),
        Arc::clone(&rig.store) as _,
        Arc::clone(&rig.writer),
        Arc::clone(&rig.clock) as Arc<dyn Clock>,
        Arc::new(NoopSystemLog),
        Arc::new(NoopMetrics),
        Arc::new(AlertCenter::new(
            Arc::clone(&rig.alert_sink) as _,
            relay_gate_config::AlertConfig::default(),
        )),
        DlqWorkerSettings {
            interval_ms: 1_000,
            batch_size: 50,
        },
    )
}

/// Fails one delivery into the DLQ and returns its trace id.
async fn seed_failed_delivery(rig: &TestRig) -> relay_gate_core::TraceId {
    let mut config = integration(1, "hook", "*");
    config.retry_count = 0;
    rig.store.upsert_integration(&config).unwrap();
    let outcome = rig
        .pipeline
        .run_event(
            &event(1, "X", "evt-1"),
            &config,
            relay_gate_core::TriggerKind::Event,
            None,
        )
        .await
        .unwrap();
    match outcome {
        relay_gate_workers::RunOutcome::Completed {
            trace_id, ..
        } => trace_id,
        relay_gate_workers::RunOutcome::Skipped => panic!("seed run skipped"),
    }
}

#[tokio::test]
async fn dlq_worker_resolves_recovered_entries() {
    let rig = rig(vec![
        status_failure(503, ErrorCategory::ServerError),
        ok_response(200),
    ]);
    let trace_id = seed_failed_delivery(&rig).await;

    rig.clock.advance_millis(5_000);
    let worker = dlq_worker(&rig);
    assert_eq!(worker.tick().await.unwrap(), 1);

    assert_eq!(rig.store.pending_dlq_count(None).unwrap(), 0);
    let log = rig.store.execution_log(&trace_id).unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Success);
}

#[tokio::test]
async fn dlq_worker_reschedules_with_exponential_backoff() {
    let rig = rig(vec![
        status_failure(503, ErrorCategory::ServerError),
        status_failure(503, ErrorCategory::ServerError),
    ]);
    seed_failed_delivery(&rig).await;

    rig.clock.advance_millis(5_000);
    let worker = dlq_worker(&rig);
    assert_eq!(worker.tick().await.unwrap(), 1);

    // retry_count moved to 1 and the entry waits out 2s backoff (+-20%).
    let due_soon = rig.store.claim_due_dlq(rig.clock.now(), 10).unwrap();
    assert!(due_soon.is_empty());
    let due_later = rig
        .store
        .claim_due_dlq(rig.clock.now().saturating_add_millis(3_000), 10)
        .unwrap();
    assert_eq!(due_later.len(), 1);
    assert_eq!(due_later[0].retry_count, 1);
}

#[tokio::test]
async fn dlq_worker_abandons_at_max_retries_with_alert() {
    // Initial failure plus three failing reprocessing attempts.
    let rig = rig(vec![
        status_failure(503, ErrorCategory::ServerError),
        status_failure(503, ErrorCategory::ServerError),
        status_failure(503, ErrorCategory::ServerError),
        status_failure(503, ErrorCategory::ServerError),
    ]);
    let trace_id = seed_failed_delivery(&rig).await;

    let worker = dlq_worker(&rig);
    for _ in 0..3 {
        rig.clock.advance_millis(600_000);
        worker.tick().await.unwrap();
    }

    assert_eq!(rig.store.pending_dlq_count(None).unwrap(), 0);
    let log = rig.store.execution_log(&trace_id).unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Abandoned);
    assert!(log.finished_at.is_some());

    let alerts = rig.alert_sink.alerts.lock().unwrap();
    assert!(alerts.iter().any(|alert| alert.kind == AlertKind::DlqAbandoned));
}

#[tokio::test]
async fn manual_dlq_operations_respect_the_bulk_cap() {
    let rig = rig(vec![status_failure(503, ErrorCategory::ServerError)]);
    seed_failed_delivery(&rig).await;
    let entry = rig
        .store
        .claim_due_dlq(rig.clock.now().saturating_add_millis(5_000), 10)
        .unwrap()
        .remove(0);
    // Return the claim so manual ops can observe PENDING_RETRY.
    rig.store
        .reschedule_dlq(
            &entry.dlq_id,
            entry.retry_count,
            rig.clock.now().saturating_add_millis(600_000),
            &entry.error,
        )
        .unwrap();

    let ids = vec![entry.dlq_id.clone()];
    assert_eq!(retry_entries(rig.store.as_ref(), &ids, rig.clock.now()).unwrap(), 1);
    let due_now = rig.store.claim_due_dlq(rig.clock.now(), 10).unwrap();
    assert_eq!(due_now.len(), 1);

    assert_eq!(
        abandon_entries(rig.store.as_ref(), &ids, Some("operator note")).unwrap(),
        1
    );
    let abandoned = rig.store.dlq_entry(&entry.dlq_id).unwrap().unwrap();
    assert_eq!(abandoned.status, DlqStatus::Abandoned);
    assert_eq!(abandoned.notes.as_deref(), Some("operator note"));

    assert_eq!(delete_entries(rig.store.as_ref(), &ids).unwrap(), 1);
    assert!(rig.store.dlq_entry(&entry.dlq_id).unwrap().is_none());

    // The bulk cap is enforced before any mutation.
    let too_many: Vec<relay_gate_core::DlqId> = (0..101)
        .map(|index| relay_gate_core::DlqId::new(format!("d-{index}")))
        .collect();
    assert!(retry_entries(rig.store.as_ref(), &too_many, rig.clock.now()).is_err());
}
