// crates/relay-gate-core/src/runtime/store.rs
// ============================================================================
// Module: Relay Gate In-Memory Store
// Description: In-memory state store for tests and single-process demos.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! [`MemoryStateStore`] implements the full [`crate::interfaces::StateStore`]
//! surface over mutex-guarded maps. Claim operations mirror the SQLite
//! store's compare-and-set semantics so worker behavior is identical across
//! backends. Not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde_json::Value;

use crate::core::DeliveryError;
use crate::core::DeliveryId;
use crate::core::Direction;
use crate::core::DlqEntry;
use crate::core::DlqId;
use crate::core::DlqStatus;
use crate::core::EventSourceConfig;
use crate::core::ExecutionLog;
use crate::core::Fingerprint;
use crate::core::IntegrationConfig;
use crate::core::IntegrationId;
use crate::core::JobId;
use crate::core::LogStatus;
use crate::core::LookupTable;
use crate::core::OrgId;
use crate::core::PendingDelivery;
use crate::core::PendingStatus;
use crate::core::ScheduledJob;
use crate::core::ScheduledJobLog;
use crate::core::SourceCheckpoint;
use crate::core::SourceType;
use crate::core::Timestamp;
use crate::core::TraceId;
use crate::core::TraceStep;
use crate::interfaces::CheckpointStore;
use crate::interfaces::DlqStore;
use crate::interfaces::EventSourceStore;
use crate::interfaces::ExecutionLogStore;
use crate::interfaces::IntegrationStore;
use crate::interfaces::LogCompletion;
use crate::interfaces::LookupStore;
use crate::interfaces::PendingDeliveryStore;
use crate::interfaces::RateLimitStore;
use crate::interfaces::ScheduledJobStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Inner State
// ============================================================================

/// Rate-limit window counter document.
#[derive(Debug, Clone)]
struct WindowCounter {
    /// Admissions recorded in the window.
    count: u32,
    /// Expiry (window end).
    expires_at: Timestamp,
}

/// Mutable store state behind the mutex.
#[derive(Debug, Default)]
struct MemoryInner {
    /// Integrations per org, insertion-ordered.
    integrations: BTreeMap<OrgId, Vec<IntegrationConfig>>,
    /// Per-org integration mutation counters.
    versions: BTreeMap<OrgId, u64>,
    /// One event source per org.
    event_sources: BTreeMap<OrgId, EventSourceConfig>,
    /// Checkpoints per `(org, source type)`.
    checkpoints: BTreeMap<(OrgId, SourceType), SourceCheckpoint>,
    /// Execution logs by trace id.
    logs: BTreeMap<String, ExecutionLog>,
    /// DLQ entries by id.
    dlq: BTreeMap<String, DlqEntry>,
    /// Rate-limit counters keyed by `(integration, window start)`.
    windows: BTreeMap<(String, i64), WindowCounter>,
    /// Pending deliveries by id.
    pending: BTreeMap<String, PendingDelivery>,
    /// Scheduled jobs by id.
    jobs: BTreeMap<String, ScheduledJob>,
    /// Job run logs, append-ordered.
    job_logs: Vec<ScheduledJobLog>,
    /// Lookup tables keyed by `(org, name)`.
    lookups: BTreeMap<(OrgId, String), LookupTable>,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-memory state store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    /// Shared inner state.
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the inner state, converting poisoning into a store error.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Store("state store mutex poisoned".to_string()))
    }
}

impl IntegrationStore for MemoryStateStore {
    fn upsert_integration(&self, config: &IntegrationConfig) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let org_id = config.org_id;
        let entries = inner.integrations.entry(org_id).or_default();
        match entries.iter_mut().find(|existing| existing.id == config.id) {
            Some(existing) => *existing = config.clone(),
            None => entries.push(config.clone()),
        }
        *inner.versions.entry(org_id).or_insert(0) += 1;
        Ok(())
    }

    fn integration(
        &self,
        org_id: OrgId,
        id: &IntegrationId,
    ) -> Result<Option<IntegrationConfig>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .integrations
            .get(&org_id)
            .and_then(|entries| entries.iter().find(|config| &config.id == id).cloned()))
    }

    fn active_outbound_defaults(
        &self,
        org_id: OrgId,
    ) -> Result<Vec<IntegrationConfig>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .integrations
            .get(&org_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|config| {
                        config.is_default
                            && config.is_active
                            && config.direction == Direction::Outbound
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn swap_default_version(
        &self,
        org_id: OrgId,
        integration_name: &str,
        new_default: &IntegrationId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entries = inner
            .integrations
            .get_mut(&org_id)
            .ok_or_else(|| StoreError::NotFound(format!("org {org_id} has no integrations")))?;
        if !entries
            .iter()
            .any(|config| &config.id == new_default && config.integration_name == integration_name)
        {
            return Err(StoreError::NotFound(format!(
                "integration {new_default} not found under name {integration_name}"
            )));
        }
        for config in entries.iter_mut() {
            if config.integration_name == integration_name {
                config.is_default = &config.id == new_default;
            }
        }
        *inner.versions.entry(org_id).or_insert(0) += 1;
        Ok(())
    }

    fn integrations_version(&self, org_id: OrgId) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        Ok(inner.versions.get(&org_id).copied().unwrap_or(0))
    }
}

impl EventSourceStore for MemoryStateStore {
    fn upsert_event_source(&self, config: &EventSourceConfig) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.event_sources.insert(config.org_id, config.clone());
        Ok(())
    }

    fn active_event_sources(&self) -> Result<Vec<EventSourceConfig>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.event_sources.values().filter(|config| config.is_active).cloned().collect())
    }
}

impl CheckpointStore for MemoryStateStore {
    fn checkpoint(
        &self,
        org_id: OrgId,
        source_type: SourceType,
    ) -> Result<Option<SourceCheckpoint>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.checkpoints.get(&(org_id, source_type)).cloned())
    }

    fn advance_checkpoint(
        &self,
        org_id: OrgId,
        source_type: SourceType,
        checkpoint: &SourceCheckpoint,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let key = (org_id, source_type);
        if let Some(previous) = inner.checkpoints.get(&key)
            && !checkpoint.advances(previous)
        {
            return Err(StoreError::Conflict(format!(
                "checkpoint regression for org {org_id} source {source_type}"
            )));
        }
        inner.checkpoints.insert(key, checkpoint.clone());
        Ok(())
    }
}

impl ExecutionLogStore for MemoryStateStore {
    fn insert_log(&self, log: &ExecutionLog) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.logs.insert(log.trace_id.as_str().to_string(), log.clone());
        Ok(())
    }

    fn append_step(&self, trace_id: &TraceId, step: &TraceStep) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let log = inner
            .logs
            .get_mut(trace_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("trace {trace_id} not found")))?;
        log.steps.push(step.clone());
        Ok(())
    }

    fn set_log_status(&self, trace_id: &TraceId, status: LogStatus) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let log = inner
            .logs
            .get_mut(trace_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("trace {trace_id} not found")))?;
        log.status = status;
        Ok(())
    }

    fn complete_log(
        &self,
        trace_id: &TraceId,
        completion: &LogCompletion,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let log = inner
            .logs
            .get_mut(trace_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("trace {trace_id} not found")))?;
        log.status = completion.status;
        log.finished_at = Some(completion.finished_at);
        let duration = completion.finished_at.millis_since(log.started_at).max(0);
        log.duration_ms = Some(u64::try_from(duration).unwrap_or(0));
        log.request = completion.request.clone().or(log.request.take());
        log.response = completion.response.clone().or(log.response.take());
        log.error = completion.error.clone();
        Ok(())
    }

    fn execution_log(&self, trace_id: &TraceId) -> Result<Option<ExecutionLog>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.logs.get(trace_id.as_str()).cloned())
    }

    fn has_terminal_log(
        &self,
        org_id: OrgId,
        fingerprint: &Fingerprint,
        integration_id: &IntegrationId,
    ) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        Ok(inner.logs.values().any(|log| {
            log.org_id == org_id
                && &log.fingerprint == fingerprint
                && &log.integration_id == integration_id
                && log.status.is_terminal()
        }))
    }

    fn recent_logs(&self, org_id: OrgId, limit: usize) -> Result<Vec<ExecutionLog>, StoreError> {
        let inner = self.lock()?;
        let mut logs: Vec<ExecutionLog> =
            inner.logs.values().filter(|log| log.org_id == org_id).cloned().collect();
        logs.sort_by(|left, right| right.started_at.cmp(&left.started_at));
        logs.truncate(limit);
        Ok(logs)
    }

    fn purge_logs_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.logs.len();
        inner.logs.retain(|_, log| log.started_at >= cutoff);
        Ok(u64::try_from(before - inner.logs.len()).unwrap_or(0))
    }
}

impl DlqStore for MemoryStateStore {
    fn insert_dlq(&self, entry: &DlqEntry) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.dlq.insert(entry.dlq_id.as_str().to_string(), entry.clone());
        Ok(())
    }

    fn claim_due_dlq(&self, now: Timestamp, limit: usize) -> Result<Vec<DlqEntry>, StoreError> {
        let mut inner = self.lock()?;
        let mut due: Vec<(Timestamp, String)> = inner
            .dlq
            .values()
            .filter(|entry| entry.status == DlqStatus::PendingRetry && entry.next_retry_at <= now)
            .map(|entry| (entry.next_retry_at, entry.dlq_id.as_str().to_string()))
            .collect();
        due.sort();
        due.truncate(limit);
        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(entry) = inner.dlq.get_mut(&id) {
                entry.status = DlqStatus::Retrying;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    fn resolve_dlq(&self, dlq_id: &DlqId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .dlq
            .get_mut(dlq_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {dlq_id} not found")))?;
        entry.status = DlqStatus::Resolved;
        Ok(())
    }

    fn reschedule_dlq(
        &self,
        dlq_id: &DlqId,
        retry_count: u32,
        next_retry_at: Timestamp,
        error: &DeliveryError,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .dlq
            .get_mut(dlq_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {dlq_id} not found")))?;
        entry.status = DlqStatus::PendingRetry;
        entry.retry_count = retry_count;
        entry.next_retry_at = next_retry_at;
        entry.error = error.clone();
        Ok(())
    }

    fn abandon_dlq(&self, dlq_id: &DlqId, notes: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .dlq
            .get_mut(dlq_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {dlq_id} not found")))?;
        entry.status = DlqStatus::Abandoned;
        entry.notes = notes.map(ToString::to_string);
        Ok(())
    }

    fn delete_dlq(&self, dlq_id: &DlqId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .dlq
            .remove(dlq_id.as_str())
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {dlq_id} not found")))
    }

    fn force_retry_dlq(&self, dlq_id: &DlqId, now: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .dlq
            .get_mut(dlq_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {dlq_id} not found")))?;
        entry.status = DlqStatus::PendingRetry;
        entry.next_retry_at = now;
        Ok(())
    }

    fn dlq_entry(&self, dlq_id: &DlqId) -> Result<Option<DlqEntry>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.dlq.get(dlq_id.as_str()).cloned())
    }

    fn pending_dlq_count(&self, org_id: Option<OrgId>) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        let count = inner
            .dlq
            .values()
            .filter(|entry| entry.status == DlqStatus::PendingRetry)
            .filter(|entry| org_id.is_none_or(|org| entry.org_id == org))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

impl RateLimitStore for MemoryStateStore {
    fn increment_window(
        &self,
        integration_id: &IntegrationId,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<u32, StoreError> {
        let mut inner = self.lock()?;
        let key = (integration_id.as_str().to_string(), window_start.as_unix_millis());
        let counter = inner.windows.entry(key).or_insert(WindowCounter {
            count: 0,
            expires_at: window_end,
        });
        counter.count = counter.count.saturating_add(1);
        Ok(counter.count)
    }

    fn purge_windows_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.windows.len();
        inner.windows.retain(|_, counter| counter.expires_at > cutoff);
        Ok(u64::try_from(before - inner.windows.len()).unwrap_or(0))
    }
}

impl PendingDeliveryStore for MemoryStateStore {
    fn insert_pending(&self, delivery: &PendingDelivery) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.pending.insert(delivery.id.as_str().to_string(), delivery.clone());
        Ok(())
    }

    fn claim_due_pending(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<PendingDelivery>, StoreError> {
        let mut inner = self.lock()?;
        let mut due: Vec<(Timestamp, String)> = inner
            .pending
            .values()
            .filter(|row| row.status == PendingStatus::Pending && row.scheduled_for <= now)
            .map(|row| (row.scheduled_for, row.id.as_str().to_string()))
            .collect();
        due.sort();
        due.truncate(limit);
        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(row) = inner.pending.get_mut(&id) {
                row.status = PendingStatus::Running;
                row.attempt = row.attempt.saturating_add(1);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    fn finish_pending(&self, id: &DeliveryId, status: PendingStatus) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let row = inner
            .pending
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("pending delivery {id} not found")))?;
        row.status = status;
        Ok(())
    }

    fn reschedule_pending(
        &self,
        id: &DeliveryId,
        scheduled_for: Timestamp,
        occurrences: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let row = inner
            .pending
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("pending delivery {id} not found")))?;
        row.status = PendingStatus::Pending;
        row.scheduled_for = scheduled_for;
        row.occurrences = occurrences;
        Ok(())
    }
}

impl ScheduledJobStore for MemoryStateStore {
    fn upsert_job(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.jobs.insert(job.job_id.as_str().to_string(), job.clone());
        Ok(())
    }

    fn due_jobs(&self, now: Timestamp) -> Result<Vec<ScheduledJob>, StoreError> {
        let inner = self.lock()?;
        let mut due: Vec<ScheduledJob> = inner
            .jobs
            .values()
            .filter(|job| job.is_active && job.next_run_at <= now)
            .cloned()
            .collect();
        due.sort_by(|left, right| left.next_run_at.cmp(&right.next_run_at));
        Ok(due)
    }

    fn record_job_run(
        &self,
        job_id: &JobId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(job_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id} not found")))?;
        job.last_run_at = Some(last_run_at);
        job.next_run_at = next_run_at;
        Ok(())
    }

    fn insert_job_log(&self, log: &ScheduledJobLog) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.job_logs.push(log.clone());
        Ok(())
    }

    fn job(&self, job_id: &JobId) -> Result<Option<ScheduledJob>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.jobs.get(job_id.as_str()).cloned())
    }

    fn query_documents(
        &self,
        collection: &str,
        filter: &BTreeMap<String, Value>,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let inner = self.lock()?;
        let documents: Vec<Value> = match collection {
            "execution_logs" => inner
                .logs
                .values()
                .filter_map(|log| serde_json::to_value(log).ok())
                .collect(),
            "dlq_entries" => {
                inner.dlq.values().filter_map(|entry| serde_json::to_value(entry).ok()).collect()
            }
            "pending_deliveries" => inner
                .pending
                .values()
                .filter_map(|row| serde_json::to_value(row).ok())
                .collect(),
            "scheduled_job_logs" => inner
                .job_logs
                .iter()
                .filter_map(|log| serde_json::to_value(log).ok())
                .collect(),
            other => {
                return Err(StoreError::NotFound(format!("unknown collection: {other}")));
            }
        };
        Ok(documents
            .into_iter()
            .filter(|document| {
                filter.iter().all(|(field, expected)| document.get(field) == Some(expected))
            })
            .take(limit)
            .collect())
    }
}

impl LookupStore for MemoryStateStore {
    fn upsert_lookup_table(&self, table: &LookupTable) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.lookups.insert((table.org_id, table.name.clone()), table.clone());
        Ok(())
    }

    fn lookup_table(&self, org_id: OrgId, name: &str) -> Result<Option<LookupTable>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.lookups.get(&(org_id, name.to_string())).cloned())
    }

    fn record_lookup_usage(
        &self,
        org_id: OrgId,
        name: &str,
        hits: u64,
        misses: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(table) = inner.lookups.get_mut(&(org_id, name.to_string())) {
            table.hits = table.hits.saturating_add(hits);
            table.misses = table.misses.saturating_add(misses);
        }
        Ok(())
    }
}
