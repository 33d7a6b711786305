// crates/relay-gate-workers/src/dlq.rs
// ============================================================================
// Module: DLQ Worker
// Description: Reprocesses dead-letter entries on exponential backoff.
// Purpose: Drive retries to resolution or abandonment, plus manual ops.
// Dependencies: relay-gate-core, rand, tokio
// ============================================================================

//! ## Overview
//! Every tick samples the queue depth for alerting, claims due entries via
//! the status compare-and-set, and reprocesses each against its original
//! trace. Success resolves the entry; failure increments `retry_count` and
//! either reschedules with `min(1s * 2^n, 5m)` plus jitter or promotes the
//! entry to `ABANDONED` with an alert and a terminal trace status. Manual
//! operations force an immediate retry, abandon with notes, or delete, with
//! bulk variants capped at 100 IDs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryError;
use relay_gate_core::DlqEntry;
use relay_gate_core::DlqId;
use relay_gate_core::ErrorCategory;
use relay_gate_core::LogStatus;
use relay_gate_core::MAX_BULK_DLQ_IDS;
use relay_gate_core::MetricEvent;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::StoreError;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use relay_gate_core::runtime::dlq_retry_delay_ms;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

use crate::alerts::AlertCenter;
use crate::log_writer::ExecutionLogWriter;
use crate::pipeline::DeliveryPipeline;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// DLQ worker tuning.
#[derive(Debug, Clone)]
pub struct DlqWorkerSettings {
    /// Tick interval in milliseconds.
    pub interval_ms: u64,
    /// Entries claimed per tick.
    pub batch_size: usize,
}

/// DLQ worker errors.
#[derive(Debug, Error)]
pub enum DlqWorkerError {
    /// State store failure (category `INTERNAL`).
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Dead-letter reprocessing worker.
pub struct DlqWorker {
    /// Shared delivery pipeline.
    pipeline: Arc<DeliveryPipeline>,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Trace writer for abandonment finalization.
    writer: Arc<ExecutionLogWriter>,
    /// Clock.
    clock: Arc<dyn Clock>,
    /// System log.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Alert evaluation.
    alerts: Arc<AlertCenter>,
    /// Tuning.
    settings: DlqWorkerSettings,
}

impl DlqWorker {
    /// Creates a DLQ worker.
    #[must_use]
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        store: Arc<dyn StateStore>,
        writer: Arc<ExecutionLogWriter>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        metrics: Arc<dyn GatewayMetrics>,
        alerts: Arc<AlertCenter>,
        settings: DlqWorkerSettings,
    ) -> Self {
        Self {
            pipeline,
            store,
            writer,
            clock,
            system_log,
            metrics,
            alerts,
            settings,
        }
    }

    /// Runs the worker loop until shutdown.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        heartbeat: &watch::Sender<Timestamp>,
    ) -> Result<(), DlqWorkerError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await?;
            let _ = heartbeat.send(self.clock.now());
            self.metrics.record(&MetricEvent::WorkerTick {
                worker: "dlq",
            });
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.settings.interval_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }
        Ok(())
    }

    /// Claims and reprocesses one batch of due entries.
    ///
    /// # Errors
    ///
    /// Returns [`DlqWorkerError`] on store failures.
    pub async fn tick(&self) -> Result<usize, DlqWorkerError> {
        let depth = self.store.pending_dlq_count(None)?;
        self.alerts.observe_dlq_depth(depth);
        self.metrics.record(&MetricEvent::DlqDepth {
            depth,
        });

        let now = self.clock.now();
        let claimed = self.store.claim_due_dlq(now, self.settings.batch_size)?;
        let processed = claimed.len();
        for entry in claimed {
            self.reprocess(entry).await?;
        }
        Ok(processed)
    }

    /// Reprocesses one claimed entry to resolution, reschedule, or abandon.
    async fn reprocess(&self, entry: DlqEntry) -> Result<(), DlqWorkerError> {
        let integration = self.store.integration(entry.org_id, &entry.integration_id)?;
        let Some(integration) = integration.filter(|config| config.is_active) else {
            self.abandon(
                &entry,
                DeliveryError::new(
                    ErrorCategory::Internal,
                    "integration_missing",
                    "integration was removed or deactivated",
                ),
            )?;
            return Ok(());
        };

        match self.pipeline.run_dlq_retry(&entry, &integration).await? {
            None => {
                self.store.resolve_dlq(&entry.dlq_id)?;
                self.system_log.log(&SystemEvent {
                    level: LogLevel::Info,
                    component: "dlq_worker".to_string(),
                    message: format!("dlq entry {} resolved", entry.dlq_id),
                    org_id: Some(entry.org_id),
                    metadata: json!({ "retry_count": entry.retry_count }),
                });
                Ok(())
            }
            Some(error) => {
                let retry_count = entry.retry_count.saturating_add(1);
                if retry_count >= entry.max_retries {
                    let mut exhausted = entry.clone();
                    exhausted.retry_count = retry_count;
                    self.abandon(&exhausted, error)?;
                } else {
                    let delay = dlq_retry_delay_ms(retry_count, &mut thread_rng());
                    let next_retry_at = self
                        .clock
                        .now()
                        .saturating_add_millis(i64::try_from(delay).unwrap_or(i64::MAX));
                    self.store.reschedule_dlq(&entry.dlq_id, retry_count, next_retry_at, &error)?;
                }
                Ok(())
            }
        }
    }

    /// Abandons one entry, finalizing its trace and raising the alert.
    fn abandon(&self, entry: &DlqEntry, error: DeliveryError) -> Result<(), StoreError> {
        self.store.abandon_dlq(&entry.dlq_id, None)?;
        let started_at = self
            .store
            .execution_log(&entry.trace_id)?
            .map_or_else(|| self.clock.now(), |log| log.started_at);
        let recorder = self.writer.resume(entry.trace_id.clone(), started_at);
        recorder.finish(LogStatus::Abandoned, None, None, Some(error));
        self.alerts.entry_abandoned(entry);
        Ok(())
    }
}

// ============================================================================
// SECTION: Manual Operations
// ============================================================================

/// Bulk operation errors.
#[derive(Debug, Error)]
pub enum DlqOpError {
    /// More than [`MAX_BULK_DLQ_IDS`] IDs were supplied.
    #[error("bulk dlq operations accept at most {MAX_BULK_DLQ_IDS} ids, got {0}")]
    TooManyIds(usize),
    /// State store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enforces the bulk ID cap.
fn check_bulk(ids: &[DlqId]) -> Result<(), DlqOpError> {
    if ids.len() > MAX_BULK_DLQ_IDS {
        return Err(DlqOpError::TooManyIds(ids.len()));
    }
    Ok(())
}

/// Forces entries due immediately, regardless of `next_retry_at`.
///
/// # Errors
///
/// Returns [`DlqOpError`] on cap violations or store failures; processing
/// stops at the first failing id.
pub fn retry_entries(
    store: &dyn StateStore,
    ids: &[DlqId],
    now: Timestamp,
) -> Result<usize, DlqOpError> {
    check_bulk(ids)?;
    for id in ids {
        store.force_retry_dlq(id, now)?;
    }
    Ok(ids.len())
}

/// Abandons entries with operator notes.
///
/// # Errors
///
/// Returns [`DlqOpError`] on cap violations or store failures.
pub fn abandon_entries(
    store: &dyn StateStore,
    ids: &[DlqId],
    notes: Option<&str>,
) -> Result<usize, DlqOpError> {
    check_bulk(ids)?;
    for id in ids {
        store.abandon_dlq(id, notes)?;
    }
    Ok(ids.len())
}

/// Deletes entries.
///
/// # Errors
///
/// Returns [`DlqOpError`] on cap violations or store failures.
pub fn delete_entries(store: &dyn StateStore, ids: &[DlqId]) -> Result<usize, DlqOpError> {
    check_bulk(ids)?;
    for id in ids {
        store.delete_dlq(id)?;
    }
    Ok(ids.len())
}
