// crates/relay-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Relay Gate Interfaces
// Description: Backend-agnostic interfaces for storage, sources, and delivery.
// Purpose: Define the contract surfaces used by gateway workers.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the gateway integrates with storage backends,
//! tenant event sources, the outbound HTTP stack, and the sandboxed script
//! evaluator without embedding backend-specific details. Implementations
//! must fail closed on missing or invalid data: an error from any seam is a
//! categorized failure, never a silent success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::DeliveryError;
use crate::core::DeliveryId;
use crate::core::DlqEntry;
use crate::core::DlqId;
use crate::core::ErrorCategory;
use crate::core::EventSourceConfig;
use crate::core::ExecutionLog;
use crate::core::Fingerprint;
use crate::core::HttpMethod;
use crate::core::IntegrationConfig;
use crate::core::IntegrationId;
use crate::core::JobId;
use crate::core::LogStatus;
use crate::core::LookupKind;
use crate::core::LookupTable;
use crate::core::NormalizedEvent;
use crate::core::OrgId;
use crate::core::OutgoingAuth;
use crate::core::PendingDelivery;
use crate::core::PendingStatus;
use crate::core::ScheduledJob;
use crate::core::ScheduledJobLog;
use crate::core::SourceCheckpoint;
use crate::core::SourceType;
use crate::core::Timestamp;
use crate::core::TraceId;
use crate::core::TraceStep;
use crate::core::trace::CapturedRequest;
use crate::core::trace::CapturedResponse;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// State store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("state store io error: {0}")]
    Io(String),
    /// Compare-and-set or unique-index conflict.
    #[error("state store conflict: {0}")]
    Conflict(String),
    /// Referenced document does not exist.
    #[error("state store missing document: {0}")]
    NotFound(String),
    /// Stored data failed decoding or an invariant check.
    #[error("state store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("state store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Integration Store
// ============================================================================

/// Persistence for integration configurations.
pub trait IntegrationStore {
    /// Inserts or replaces an integration configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn upsert_integration(&self, config: &IntegrationConfig) -> Result<(), StoreError>;

    /// Loads one integration by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn integration(
        &self,
        org_id: OrgId,
        id: &IntegrationId,
    ) -> Result<Option<IntegrationConfig>, StoreError>;

    /// Lists active, default-version outbound integrations for an org in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn active_outbound_defaults(&self, org_id: OrgId)
    -> Result<Vec<IntegrationConfig>, StoreError>;

    /// Atomically moves the default flag of `integration_name` to
    /// `new_default`, clearing it on every sibling version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the target version is missing
    /// and [`StoreError`] when the transaction fails.
    fn swap_default_version(
        &self,
        org_id: OrgId,
        integration_name: &str,
        new_default: &IntegrationId,
    ) -> Result<(), StoreError>;

    /// Returns the org's integration mutation counter, bumped on every
    /// write; the matcher cache uses it for invalidation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the counter cannot be read.
    fn integrations_version(&self, org_id: OrgId) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Event Source Store
// ============================================================================

/// Persistence for per-org event source configurations.
pub trait EventSourceStore {
    /// Inserts or replaces an event source configuration. Activating a
    /// source deactivates any other source for the same org.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn upsert_event_source(&self, config: &EventSourceConfig) -> Result<(), StoreError>;

    /// Lists every active event source across orgs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn active_event_sources(&self) -> Result<Vec<EventSourceConfig>, StoreError>;
}

// ============================================================================
// SECTION: Checkpoint Store
// ============================================================================

/// Persistence for source resume cursors.
pub trait CheckpointStore {
    /// Loads the checkpoint for `(org, source type)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn checkpoint(
        &self,
        org_id: OrgId,
        source_type: SourceType,
    ) -> Result<Option<SourceCheckpoint>, StoreError>;

    /// Atomically advances the checkpoint. Regressions are rejected with
    /// [`StoreError::Conflict`] to keep cursors monotone across replicas.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails or regresses.
    fn advance_checkpoint(
        &self,
        org_id: OrgId,
        source_type: SourceType,
        checkpoint: &SourceCheckpoint,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Execution Log Store
// ============================================================================

/// Terminal fields written when a trace completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogCompletion {
    /// Terminal or retrying status.
    pub status: LogStatus,
    /// Completion time; duration derives from the stored `started_at`.
    pub finished_at: Timestamp,
    /// Last outbound request snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<CapturedRequest>,
    /// Last response snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
    /// Terminal error, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DeliveryError>,
}

/// Persistence for execution traces.
pub trait ExecutionLogStore {
    /// Inserts a fresh pending log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn insert_log(&self, log: &ExecutionLog) -> Result<(), StoreError>;

    /// Appends one step to a trace; the push is atomic and ordered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown traces.
    fn append_step(&self, trace_id: &TraceId, step: &TraceStep) -> Result<(), StoreError>;

    /// Updates the in-flight status of a trace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown traces.
    fn set_log_status(&self, trace_id: &TraceId, status: LogStatus) -> Result<(), StoreError>;

    /// Writes the terminal fields of a trace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown traces.
    fn complete_log(&self, trace_id: &TraceId, completion: &LogCompletion)
    -> Result<(), StoreError>;

    /// Loads one trace by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn execution_log(&self, trace_id: &TraceId) -> Result<Option<ExecutionLog>, StoreError>;

    /// Returns true when a terminal log exists for the identity triple; used
    /// for idempotent replay of redelivered events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn has_terminal_log(
        &self,
        org_id: OrgId,
        fingerprint: &Fingerprint,
        integration_id: &IntegrationId,
    ) -> Result<bool, StoreError>;

    /// Lists recent traces for an org, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn recent_logs(&self, org_id: OrgId, limit: usize) -> Result<Vec<ExecutionLog>, StoreError>;

    /// Deletes traces started before the cutoff; returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the sweep fails.
    fn purge_logs_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: DLQ Store
// ============================================================================

/// Persistence for dead-letter queue entries.
pub trait DlqStore {
    /// Inserts a new DLQ entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn insert_dlq(&self, entry: &DlqEntry) -> Result<(), StoreError>;

    /// Claims up to `limit` due entries, atomically moving each from
    /// `PENDING_RETRY` to `RETRYING`. Entries claimed by a concurrent
    /// replica are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the claim query fails.
    fn claim_due_dlq(&self, now: Timestamp, limit: usize) -> Result<Vec<DlqEntry>, StoreError>;

    /// Marks an entry resolved after successful reprocessing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown entries.
    fn resolve_dlq(&self, dlq_id: &DlqId) -> Result<(), StoreError>;

    /// Returns an entry to `PENDING_RETRY` with an incremented retry count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown entries.
    fn reschedule_dlq(
        &self,
        dlq_id: &DlqId,
        retry_count: u32,
        next_retry_at: Timestamp,
        error: &DeliveryError,
    ) -> Result<(), StoreError>;

    /// Marks an entry abandoned, recording optional operator notes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown entries.
    fn abandon_dlq(&self, dlq_id: &DlqId, notes: Option<&str>) -> Result<(), StoreError>;

    /// Removes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown entries.
    fn delete_dlq(&self, dlq_id: &DlqId) -> Result<(), StoreError>;

    /// Forces an entry due immediately, regardless of `next_retry_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown entries.
    fn force_retry_dlq(&self, dlq_id: &DlqId, now: Timestamp) -> Result<(), StoreError>;

    /// Loads one entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn dlq_entry(&self, dlq_id: &DlqId) -> Result<Option<DlqEntry>, StoreError>;

    /// Counts entries awaiting retry, optionally scoped to one org.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn pending_dlq_count(&self, org_id: Option<OrgId>) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Rate Limit Store
// ============================================================================

/// Persistence for fixed-window admission counters.
pub trait RateLimitStore {
    /// Atomically increments the counter for `(integration, window_start)`
    /// and returns the count after the increment. The document expires at
    /// `window_end`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the increment fails.
    fn increment_window(
        &self,
        integration_id: &IntegrationId,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<u32, StoreError>;

    /// Deletes expired window counters; returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the sweep fails.
    fn purge_windows_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Pending Delivery Store
// ============================================================================

/// Persistence for scheduled delivery instances.
pub trait PendingDeliveryStore {
    /// Inserts a pending delivery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn insert_pending(&self, delivery: &PendingDelivery) -> Result<(), StoreError>;

    /// Claims up to `limit` due rows, atomically moving each from `PENDING`
    /// to `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the claim query fails.
    fn claim_due_pending(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<PendingDelivery>, StoreError>;

    /// Writes the terminal status of a fired delivery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown rows.
    fn finish_pending(&self, id: &DeliveryId, status: PendingStatus) -> Result<(), StoreError>;

    /// Returns a recurring delivery to `PENDING` at its next occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown rows.
    fn reschedule_pending(
        &self,
        id: &DeliveryId,
        scheduled_for: Timestamp,
        occurrences: u32,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Scheduled Job Store
// ============================================================================

/// Persistence for scheduled jobs and their run logs.
pub trait ScheduledJobStore {
    /// Inserts or replaces a job definition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn upsert_job(&self, job: &ScheduledJob) -> Result<(), StoreError>;

    /// Lists active jobs whose `next_run_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn due_jobs(&self, now: Timestamp) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Records a completed run and the next scheduled occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown jobs.
    fn record_job_run(
        &self,
        job_id: &JobId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Appends a job run log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn insert_job_log(&self, log: &ScheduledJobLog) -> Result<(), StoreError>;

    /// Loads one job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn job(&self, job_id: &JobId) -> Result<Option<ScheduledJob>, StoreError>;

    /// Runs an equality-filter query over a document collection; used by the
    /// `document_query` job data source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn query_documents(
        &self,
        collection: &str,
        filter: &BTreeMap<String, Value>,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError>;
}

// ============================================================================
// SECTION: Lookup Store
// ============================================================================

/// Persistence for lookup tables.
pub trait LookupStore {
    /// Inserts or replaces a lookup table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn upsert_lookup_table(&self, table: &LookupTable) -> Result<(), StoreError>;

    /// Loads one table by org and name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn lookup_table(&self, org_id: OrgId, name: &str) -> Result<Option<LookupTable>, StoreError>;

    /// Adds hit/miss counts to a table's statistics. Counters are advisory
    /// and updated out of the delivery path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn record_lookup_usage(
        &self,
        org_id: OrgId,
        name: &str,
        hits: u64,
        misses: u64,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: State Store
// ============================================================================

/// Full persistence surface required by the gateway workers.
pub trait StateStore:
    IntegrationStore
    + EventSourceStore
    + CheckpointStore
    + ExecutionLogStore
    + DlqStore
    + RateLimitStore
    + PendingDeliveryStore
    + ScheduledJobStore
    + LookupStore
    + Send
    + Sync
{
}

impl<T> StateStore for T where
    T: IntegrationStore
        + EventSourceStore
        + CheckpointStore
        + ExecutionLogStore
        + DlqStore
        + RateLimitStore
        + PendingDeliveryStore
        + ScheduledJobStore
        + LookupStore
        + Send
        + Sync
{
}

// ============================================================================
// SECTION: Event Sources
// ============================================================================

/// Errors surfaced by source adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient failure; the adapter backs off and retries.
    #[error("transient source error: {0}")]
    Transient(String),
    /// Source credentials were rejected; checkpoint is left untouched.
    #[error("source auth failure: {0}")]
    Auth(String),
    /// A row or message could not be decoded and was skipped.
    #[error("corrupt source record ({skip_category}): {message}")]
    Corrupt {
        /// Audit category for the skipped record.
        skip_category: String,
        /// Decode failure detail.
        message: String,
    },
    /// Unrecoverable adapter failure; the supervisor restarts the adapter.
    #[error("fatal source error: {0}")]
    Fatal(String),
}

/// One fetched batch of normalized events plus the cursor to commit after
/// every event is enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    /// Events in source order.
    pub events: Vec<NormalizedEvent>,
    /// Checkpoint to commit once the whole batch is enqueued.
    pub checkpoint: Option<SourceCheckpoint>,
}

impl SourceBatch {
    /// Returns an empty batch with no checkpoint movement.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            events: Vec::new(),
            checkpoint: None,
        }
    }
}

/// Per-org event source with resumable batch semantics.
///
/// # Invariants
/// - `next_batch` must not advance durable cursors; only `commit` does.
/// - After `commit(checkpoint)`, a restarted adapter resumes past the
///   committed position.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Owning organization.
    fn org_id(&self) -> OrgId;

    /// Stable source type label.
    fn source_type(&self) -> SourceType;

    /// Prepares the adapter (connections, consumer-group join, checkpoint
    /// load).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the source cannot be reached.
    async fn start(&mut self) -> Result<(), SourceError>;

    /// Releases adapter resources.
    async fn stop(&mut self);

    /// Fetches the next batch of events past the current cursor.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when fetching fails.
    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError>;

    /// Durably commits a checkpoint after the batch was fully enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the commit fails.
    async fn commit(&mut self, checkpoint: &SourceCheckpoint) -> Result<(), SourceError>;
}

// ============================================================================
// SECTION: Request Dispatch
// ============================================================================

/// Fully prepared outbound request handed to the HTTP deliverer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Target URL.
    pub url: String,
    /// Complete header set (static, auth, signing, trace).
    pub headers: BTreeMap<String, String>,
    /// Serialized body, when the method carries one.
    pub body: Option<String>,
    /// Overall deadline in milliseconds.
    pub timeout_ms: u64,
}

/// Response captured from a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Response body, truncated by the deliverer.
    pub body: String,
    /// Wall-clock duration of the exchange in milliseconds.
    pub duration_ms: u64,
}

/// Classified outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 2xx response.
    Success(DispatchResponse),
    /// Classified failure; `response` is present when a response arrived.
    Failure {
        /// Category-tagged failure.
        error: DeliveryError,
        /// Response snapshot, when one was received.
        response: Option<DispatchResponse>,
        /// Server-provided retry hint (429 `Retry-After`), in milliseconds.
        retry_after_ms: Option<u64>,
    },
}

impl DispatchOutcome {
    /// Returns the failure category, when failed.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Success(_) => None,
            Self::Failure {
                error, ..
            } => Some(error.category),
        }
    }
}

/// Outbound HTTP seam; the deliverer enforces SSRF policy and deadlines.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Issues the request and classifies the outcome. Failures are encoded
    /// in the outcome, never as a transport panic.
    async fn dispatch(&self, request: &OutboundRequest) -> DispatchOutcome;
}

// ============================================================================
// SECTION: Auth Header Builder
// ============================================================================

/// Builds outgoing-auth headers, including cached OAuth2 tokens.
#[async_trait]
pub trait AuthHeaderBuilder: Send + Sync {
    /// Produces the auth headers for one action.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] with category `AUTH` when credentials
    /// cannot be constructed or fetched.
    async fn build(
        &self,
        org_id: OrgId,
        integration_id: &IntegrationId,
        auth: &OutgoingAuth,
    ) -> Result<BTreeMap<String, String>, DeliveryError>;
}

// ============================================================================
// SECTION: Script Evaluator
// ============================================================================

/// Script failure kinds; each surfaces as category `TRANSFORMATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFailure {
    /// Script failed to parse.
    Syntax,
    /// Script raised at runtime.
    Runtime,
    /// Script exceeded its CPU budget.
    Timeout,
    /// Script returned a non-serializable value.
    InvalidOutput,
}

/// Script evaluation errors.
#[derive(Debug, Error)]
#[error("script {kind:?} failure: {message}")]
pub struct ScriptError {
    /// Failure kind.
    pub kind: ScriptFailure,
    /// Failure detail.
    pub message: String,
}

/// Sandboxed `transform(input)` evaluator.
///
/// # Invariants
/// - No I/O, network, filesystem, or process access.
/// - CPU time is bounded (1 s) and output size is bounded (16 MiB).
/// - Output must serialize to JSON.
pub trait ScriptEvaluator: Send + Sync {
    /// Evaluates a script against an input payload.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] for syntax, runtime, timeout, or output
    /// failures.
    fn evaluate(&self, script: &str, input: &Value) -> Result<Value, ScriptError>;
}

/// Fail-closed evaluator used when no sandbox is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScriptEvaluator;

impl ScriptEvaluator for NoScriptEvaluator {
    fn evaluate(&self, _script: &str, _input: &Value) -> Result<Value, ScriptError> {
        Err(ScriptError {
            kind: ScriptFailure::Runtime,
            message: "no script evaluator is configured".to_string(),
        })
    }
}

// ============================================================================
// SECTION: Lookup Resolver
// ============================================================================

/// Lookup resolution errors.
#[derive(Debug, Error)]
pub enum LookupResolveError {
    /// Referenced table does not exist for the org.
    #[error("lookup table not found: {0}")]
    MissingTable(String),
    /// Backing store failed.
    #[error("lookup store error: {0}")]
    Store(String),
}

/// Resolves lookup-table references during SIMPLE transformations.
pub trait LookupResolver: Send + Sync {
    /// Resolves `key` through the named table in the given mode. `None`
    /// means the table exists but has no matching entry.
    ///
    /// # Errors
    ///
    /// Returns [`LookupResolveError`] for missing tables or store failures.
    fn resolve(
        &self,
        org_id: OrgId,
        table: &str,
        key: &str,
        kind: LookupKind,
    ) -> Result<Option<String>, LookupResolveError>;
}

// ============================================================================
// SECTION: Observability Sinks
// ============================================================================

/// Severity of a system log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Routine operational detail.
    Info,
    /// Degraded but continuing.
    Warn,
    /// Failed operation requiring attention.
    Error,
}

/// Structured system event emitted by workers and adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Severity.
    pub level: LogLevel,
    /// Emitting component (`delivery_worker`, `polling_sql`, …).
    pub component: String,
    /// Human-readable message, secret-free.
    pub message: String,
    /// Org context when tenant-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Sink for structured system events.
pub trait SystemLogSink: Send + Sync {
    /// Records one event. Implementations must not block the caller.
    fn log(&self, event: &SystemEvent);
}

/// Discards all system events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSystemLog;

impl SystemLogSink for NoopSystemLog {
    fn log(&self, _event: &SystemEvent) {}
}

/// Alert kinds surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// DLQ size exceeded the configured threshold.
    DlqDepthExceeded,
    /// A DLQ entry exhausted its retries.
    DlqAbandoned,
    /// Failure burst detected within the detection window.
    FailureBurst,
    /// Source credentials were rejected.
    SourceAuthFailure,
}

/// One operator alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAlert {
    /// Alert kind.
    pub kind: AlertKind,
    /// Org context when tenant-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    /// Human-readable summary, secret-free.
    pub message: String,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Sink for operator alerts.
pub trait AlertSink: Send + Sync {
    /// Emits one alert. Implementations must not block the caller.
    fn alert(&self, alert: &GatewayAlert);
}

/// Discards all alerts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlertSink;

impl AlertSink for NoopAlertSink {
    fn alert(&self, _alert: &GatewayAlert) {}
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Metric events emitted by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// One delivery attempt finished.
    DeliveryCompleted {
        /// Owning organization.
        org_id: OrgId,
        /// Failure category; `None` for success.
        category: Option<ErrorCategory>,
        /// Attempt duration in milliseconds.
        duration_ms: u64,
    },
    /// A delivery was rejected at admission.
    RateLimited {
        /// Affected integration.
        integration_id: IntegrationId,
    },
    /// A worker loop completed one tick.
    WorkerTick {
        /// Worker label.
        worker: &'static str,
    },
    /// DLQ depth sample.
    DlqDepth {
        /// Entries awaiting retry.
        depth: u64,
    },
    /// A source adapter skipped a corrupt record.
    SourceRecordSkipped {
        /// Owning organization.
        org_id: OrgId,
        /// Audit category for the skip.
        skip_category: String,
    },
}

/// Metrics seam; deployments plug in Prometheus or OpenTelemetry exporters
/// without redesign.
pub trait GatewayMetrics: Send + Sync {
    /// Records one metric event.
    fn record(&self, event: &MetricEvent);
}

/// Discards all metric events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl GatewayMetrics for NoopMetrics {
    fn record(&self, _event: &MetricEvent) {}
}
