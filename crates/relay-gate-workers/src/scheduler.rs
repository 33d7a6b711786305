// crates/relay-gate-workers/src/scheduler.rs
// ============================================================================
// Module: Scheduler Worker
// Description: Fires DELAYED and RECURRING deliveries at their due time.
// Purpose: Claim due rows and feed them through the delivery pipeline.
// Dependencies: relay-gate-core, tokio
// ============================================================================

//! ## Overview
//! Every tick claims PENDING rows with `scheduled_for <= now` via the
//! store's status compare-and-set and submits each as a synthetic event.
//! Recurring rows advance by their interval, honoring `max_occurrences` and
//! `end_at` termination; a failed occurrence does not stop the schedule.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use relay_gate_core::Clock;
use relay_gate_core::LogStatus;
use relay_gate_core::MetricEvent;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::PendingDelivery;
use relay_gate_core::PendingStatus;
use relay_gate_core::Timestamp;
use relay_gate_core::TriggerKind;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::StoreError;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

use crate::pipeline::DeliveryPipeline;
use crate::pipeline::RunOutcome;
use crate::pool::TaskPool;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Scheduler worker tuning.
#[derive(Debug, Clone)]
pub struct SchedulerWorkerSettings {
    /// Tick interval in milliseconds.
    pub interval_ms: u64,
    /// Rows claimed per tick.
    pub batch_size: usize,
    /// Task pool size for pipeline runs.
    pub pool_size: usize,
}

/// Scheduler worker errors.
#[derive(Debug, Error)]
pub enum SchedulerWorkerError {
    /// State store failure (category `INTERNAL`).
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// DELAYED/RECURRING delivery scheduler.
pub struct SchedulerWorker {
    /// Shared delivery pipeline.
    pipeline: Arc<DeliveryPipeline>,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Bounded pipeline pool.
    pool: TaskPool,
    /// Clock.
    clock: Arc<dyn Clock>,
    /// System log.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Tuning.
    settings: SchedulerWorkerSettings,
}

impl SchedulerWorker {
    /// Creates a scheduler worker.
    #[must_use]
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        metrics: Arc<dyn GatewayMetrics>,
        settings: SchedulerWorkerSettings,
    ) -> Self {
        let pool = TaskPool::new(settings.pool_size);
        Self {
            pipeline,
            store,
            pool,
            clock,
            system_log,
            metrics,
            settings,
        }
    }

    /// Runs the worker loop until shutdown.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        heartbeat: &watch::Sender<Timestamp>,
    ) -> Result<(), SchedulerWorkerError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await?;
            let _ = heartbeat.send(self.clock.now());
            self.metrics.record(&MetricEvent::WorkerTick {
                worker: "scheduler",
            });
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.settings.interval_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }
        Ok(())
    }

    /// Claims and fires one batch of due deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerWorkerError`] on store failures.
    pub async fn tick(&self) -> Result<usize, SchedulerWorkerError> {
        let now = self.clock.now();
        let claimed = self.store.claim_due_pending(now, self.settings.batch_size)?;
        let fired = claimed.len();
        let mut runs = Vec::new();
        for row in claimed {
            let pipeline = Arc::clone(&self.pipeline);
            let store = Arc::clone(&self.store);
            let clock = Arc::clone(&self.clock);
            let system_log = Arc::clone(&self.system_log);
            runs.push(async move {
                let outcome = fire_row(&pipeline, store.as_ref(), clock.as_ref(), &row).await;
                if let Err(err) = outcome {
                    system_log.log(&SystemEvent {
                        level: LogLevel::Error,
                        component: "scheduler".to_string(),
                        message: format!("scheduled delivery {} failed: {err}", row.id),
                        org_id: Some(row.org_id),
                        metadata: json!({ "integration_id": row.integration_id.as_str() }),
                    });
                    let _ = store.finish_pending(&row.id, PendingStatus::Failed);
                }
            });
        }
        for result in self.pool.run_all(runs).await {
            if let Err(panic_message) = result {
                self.system_log.log(&SystemEvent {
                    level: LogLevel::Error,
                    component: "scheduler".to_string(),
                    message: format!("scheduled delivery task panicked: {panic_message}"),
                    org_id: None,
                    metadata: serde_json::Value::Null,
                });
            }
        }
        Ok(fired)
    }

}

/// Fires one claimed row through the pipeline and settles its status.
async fn fire_row(
    pipeline: &DeliveryPipeline,
    store: &dyn StateStore,
    clock: &dyn Clock,
    row: &PendingDelivery,
) -> Result<(), StoreError> {
    let integration = store
        .integration(row.org_id, &row.integration_id)?
        .filter(|config| config.is_active)
        .ok_or_else(|| {
            StoreError::NotFound(format!(
                "integration {} is missing or inactive",
                row.integration_id
            ))
        })?;

    // Each occurrence carries its own identity so recurrences never
    // deduplicate against each other.
    let source_event_id = format!("{}:{}", row.id, row.occurrences);
    let event = NormalizedEvent {
        org_id: row.org_id,
        event_type: integration.event_type.clone(),
        entity_rid: None,
        payload: row.payload.clone(),
        source_event_id: source_event_id.clone(),
        produced_at: clock.now(),
        fingerprint: event_fingerprint(row.org_id, "scheduler", &source_event_id)
            .map_err(|err| StoreError::Invalid(err.to_string()))?,
    };
    let outcome = pipeline
        .run_event(&event, &integration, TriggerKind::Scheduled, row.action_index)
        .await?;
    let status = match outcome {
        RunOutcome::Completed {
            status, ..
        } => status,
        RunOutcome::Skipped => LogStatus::Success,
    };

    let fired_at = clock.now();
    if let Some(next) = row.next_occurrence(fired_at) {
        store.reschedule_pending(&row.id, next, row.occurrences.saturating_add(1))?;
    } else {
        let terminal = if status == LogStatus::Success {
            PendingStatus::Done
        } else {
            PendingStatus::Failed
        };
        store.finish_pending(&row.id, terminal)?;
    }
    Ok(())
}
