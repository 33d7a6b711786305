// crates/relay-gate-workers/src/delivery.rs
// ============================================================================
// Module: Delivery Worker
// Description: Event-driven delivery loop over the source adapters.
// Purpose: Pull, match, deliver, and checkpoint tenant events.
// Dependencies: relay-gate-core, tokio
// ============================================================================

//! ## Overview
//! Each tick pulls one batch per active source adapter, resolves matches in
//! source order, and runs the pipeline for every `(event, matched
//! integration)` pair through the bounded task pool. The source checkpoint
//! commits only after the whole batch has been processed, preserving
//! at-least-once semantics; redelivered events deduplicate against their
//! terminal execution logs. The tick also owns the retention sweeps for
//! execution logs and expired rate-limit windows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use rand::thread_rng;
use relay_gate_core::Clock;
use relay_gate_core::MetricEvent;
use relay_gate_core::OrgId;
use relay_gate_core::SourceType;
use relay_gate_core::Timestamp;
use relay_gate_core::TriggerKind;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::SourceError;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::StoreError;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use relay_gate_core::runtime::MatcherCache;
use relay_gate_core::runtime::exponential_delay_ms;
use relay_gate_core::runtime::match_event;
use relay_gate_core::runtime::with_jitter;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

use crate::alerts::AlertCenter;
use crate::pipeline::DeliveryPipeline;
use crate::pool::TaskPool;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Delivery worker tuning.
#[derive(Debug, Clone)]
pub struct DeliveryWorkerSettings {
    /// Tick interval in milliseconds.
    pub interval_ms: u64,
    /// Task pool size for pipeline runs.
    pub pool_size: usize,
    /// Events older than this are dropped at ingestion.
    pub max_event_age_days: u32,
    /// Execution-log retention in days.
    pub log_retention_days: u32,
}

/// Delivery worker errors; any of these pauses the worker for restart.
#[derive(Debug, Error)]
pub enum DeliveryWorkerError {
    /// State store failure (category `INTERNAL`).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Unrecoverable source failure.
    #[error("source failure: {0}")]
    Source(String),
}

/// Backoff cap for transient source failures.
const SOURCE_BACKOFF_CAP_MS: u64 = 300_000;

/// Backoff state for one failing source.
#[derive(Debug, Clone, Copy)]
struct SourceBackoff {
    /// Consecutive transient failures.
    failures: u32,
    /// Earliest next poll.
    retry_at: Timestamp,
}

/// Per-tick processing counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Events pulled from sources.
    pub events: usize,
    /// Pipeline runs started.
    pub runs: usize,
    /// Events dropped for exceeding the age bound.
    pub dropped_stale: usize,
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Event-driven delivery worker.
pub struct DeliveryWorker {
    /// Shared delivery pipeline.
    pipeline: Arc<DeliveryPipeline>,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Per-org compiled match cache.
    cache: Arc<MatcherCache>,
    /// Bounded pipeline pool.
    pool: TaskPool,
    /// Clock.
    clock: Arc<dyn Clock>,
    /// System log.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Alert evaluation.
    alerts: Arc<AlertCenter>,
    /// Transient-failure backoff per source.
    source_backoff: Mutex<BTreeMap<(OrgId, SourceType), SourceBackoff>>,
    /// Tuning.
    settings: DeliveryWorkerSettings,
}

impl DeliveryWorker {
    /// Creates a delivery worker.
    #[must_use]
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        store: Arc<dyn StateStore>,
        cache: Arc<MatcherCache>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        metrics: Arc<dyn GatewayMetrics>,
        alerts: Arc<AlertCenter>,
        settings: DeliveryWorkerSettings,
    ) -> Self {
        let pool = TaskPool::new(settings.pool_size);
        Self {
            pipeline,
            store,
            cache,
            pool,
            clock,
            system_log,
            metrics,
            alerts,
            source_backoff: Mutex::new(BTreeMap::new()),
            settings,
        }
    }

    /// Returns true while a source is waiting out its transient backoff.
    fn in_backoff(&self, key: (OrgId, SourceType), now: Timestamp) -> bool {
        self.source_backoff
            .lock()
            .ok()
            .and_then(|guard| guard.get(&key).map(|state| now < state.retry_at))
            .unwrap_or(false)
    }

    /// Records one transient failure, extending the backoff exponentially.
    fn record_transient(&self, key: (OrgId, SourceType), now: Timestamp) {
        if let Ok(mut guard) = self.source_backoff.lock() {
            let failures = guard.get(&key).map_or(0, |state| state.failures).saturating_add(1);
            let delay = with_jitter(
                exponential_delay_ms(1_000, failures.saturating_sub(1), SOURCE_BACKOFF_CAP_MS),
                &mut thread_rng(),
            );
            guard.insert(key, SourceBackoff {
                failures,
                retry_at: now.saturating_add_millis(i64::try_from(delay).unwrap_or(i64::MAX)),
            });
        }
    }

    /// Clears the backoff after a successful fetch.
    fn clear_backoff(&self, key: (OrgId, SourceType)) {
        if let Ok(mut guard) = self.source_backoff.lock() {
            guard.remove(&key);
        }
    }

    /// Runs the worker loop until shutdown.
    ///
    /// Sources are started once and drained every tick; the heartbeat is
    /// published after each completed tick for the health endpoint.
    pub async fn run(
        &self,
        mut sources: Vec<Box<dyn EventSource>>,
        mut shutdown: watch::Receiver<bool>,
        heartbeat: &watch::Sender<Timestamp>,
    ) -> Result<(), DeliveryWorkerError> {
        for source in &mut sources {
            if let Err(err) = source.start().await {
                self.warn(&format!("source start failed: {err}"), json!({}));
            }
        }
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick(&mut sources).await?;
            let _ = heartbeat.send(self.clock.now());
            self.metrics.record(&MetricEvent::WorkerTick {
                worker: "delivery",
            });
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.settings.interval_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }
        for source in &mut sources {
            source.stop().await;
        }
        Ok(())
    }

    /// Processes one batch from every source, then sweeps retention.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryWorkerError`] on store failures or fatal source
    /// failures; the supervisor restarts the worker.
    pub async fn tick(
        &self,
        sources: &mut [Box<dyn EventSource>],
    ) -> Result<TickSummary, DeliveryWorkerError> {
        let mut summary = TickSummary::default();
        for source in sources.iter_mut() {
            let org_id = source.org_id();
            let backoff_key = (org_id, source.source_type());
            if self.in_backoff(backoff_key, self.clock.now()) {
                continue;
            }
            let batch = match source.next_batch().await {
                Ok(batch) => {
                    self.clear_backoff(backoff_key);
                    batch
                }
                Err(SourceError::Transient(message)) => {
                    self.record_transient(backoff_key, self.clock.now());
                    self.warn(&format!("transient source failure: {message}"), json!({
                        "org_id": org_id.as_i32(),
                    }));
                    continue;
                }
                Err(SourceError::Auth(message)) => {
                    self.alerts.source_auth_failure(org_id, &message);
                    continue;
                }
                Err(SourceError::Corrupt {
                    skip_category,
                    message,
                }) => {
                    self.warn(&format!("corrupt source batch: {message}"), json!({
                        "org_id": org_id.as_i32(),
                        "skip_category": skip_category,
                    }));
                    continue;
                }
                Err(SourceError::Fatal(message)) => {
                    return Err(DeliveryWorkerError::Source(message));
                }
            };

            let mut runs = Vec::new();
            let now = self.clock.now();
            let max_age_ms =
                i64::from(self.settings.max_event_age_days).saturating_mul(86_400_000);
            for event in batch.events {
                summary.events += 1;
                if now.millis_since(event.produced_at) > max_age_ms {
                    summary.dropped_stale += 1;
                    self.warn("dropped stale event", json!({
                        "org_id": event.org_id.as_i32(),
                        "source_event_id": event.source_event_id,
                    }));
                    continue;
                }
                // Matching happens in source order; execution is pooled.
                let candidates = self.cache.candidates(self.store.as_ref(), event.org_id)?;
                for matched in match_event(&candidates, &event) {
                    summary.runs += 1;
                    let pipeline = Arc::clone(&self.pipeline);
                    let system_log = Arc::clone(&self.system_log);
                    let event = event.clone();
                    let integration = matched.clone();
                    runs.push(async move {
                        if let Err(err) = pipeline
                            .run_event(&event, &integration, TriggerKind::Event, None)
                            .await
                        {
                            system_log.log(&SystemEvent {
                                level: LogLevel::Error,
                                component: "delivery_worker".to_string(),
                                message: format!("pipeline run failed before tracing: {err}"),
                                org_id: Some(event.org_id),
                                metadata: serde_json::Value::Null,
                            });
                        }
                    });
                }
            }
            let results = self.pool.run_all(runs).await;
            for result in results {
                if let Err(panic_message) = result {
                    self.warn(&format!("pipeline task panicked: {panic_message}"), json!({
                        "org_id": org_id.as_i32(),
                    }));
                }
            }
            if let Some(checkpoint) = batch.checkpoint
                && let Err(err) = source.commit(&checkpoint).await
            {
                self.warn(&format!("checkpoint commit failed: {err}"), json!({
                    "org_id": org_id.as_i32(),
                }));
            }
        }
        self.sweep_retention()?;
        Ok(summary)
    }

    /// Deletes expired execution logs and rate-limit windows.
    fn sweep_retention(&self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let cutoff = now.saturating_add_millis(
            -i64::from(self.settings.log_retention_days).saturating_mul(86_400_000),
        );
        self.store.purge_logs_before(cutoff)?;
        self.store.purge_windows_before(now)?;
        Ok(())
    }

    /// Emits one warning system event.
    fn warn(&self, message: &str, metadata: serde_json::Value) {
        self.system_log.log(&SystemEvent {
            level: LogLevel::Warn,
            component: "delivery_worker".to_string(),
            message: message.to_string(),
            org_id: None,
            metadata,
        });
    }
}
