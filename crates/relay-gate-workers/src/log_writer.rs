// crates/relay-gate-workers/src/log_writer.rs
// ============================================================================
// Module: Execution Log Writer
// Description: Append-only trace recording with secret redaction.
// Purpose: Preserve the causal chain of each attempt without leaking secrets.
// Dependencies: relay-gate-core, serde_json
// ============================================================================

//! ## Overview
//! A [`TraceRecorder`] is created per delivery attempt. Steps are appended
//! through the store's atomic push with wall-clock deltas from the trace
//! start; captured request headers are masked and bodies truncated before
//! anything reaches the store. Step writes are best-effort after the log
//! exists: a failed append is logged as a system event but never fails the
//! delivery it describes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use relay_gate_core::CapturedRequest;
use relay_gate_core::CapturedResponse;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryError;
use relay_gate_core::ExecutionLog;
use relay_gate_core::LogStatus;
use relay_gate_core::StepStatus;
use relay_gate_core::Timestamp;
use relay_gate_core::TraceId;
use relay_gate_core::TraceStep;
use relay_gate_core::interfaces::LogCompletion;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::StoreError;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use relay_gate_core::mask_headers;
use relay_gate_core::truncate_body;
use serde_json::Value;

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Shared execution-log writer with redaction policy.
pub struct ExecutionLogWriter {
    /// Trace persistence.
    store: Arc<dyn StateStore>,
    /// Clock for step timestamps.
    clock: Arc<dyn Clock>,
    /// System log for best-effort write failures.
    system_log: Arc<dyn SystemLogSink>,
    /// Additional header names masked before persistence.
    extra_secret_headers: Vec<String>,
}

impl ExecutionLogWriter {
    /// Creates a writer over the given store.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        extra_secret_headers: Vec<String>,
    ) -> Self {
        Self {
            store,
            clock,
            system_log,
            extra_secret_headers,
        }
    }

    /// Inserts a fresh pending log and returns its recorder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails; a delivery never runs
    /// without its trace.
    pub fn begin(&self, log: &ExecutionLog) -> Result<TraceRecorder<'_>, StoreError> {
        self.store.insert_log(log)?;
        Ok(TraceRecorder {
            writer: self,
            trace_id: log.trace_id.clone(),
            started_at: log.started_at,
        })
    }

    /// Re-opens a recorder for an existing trace (DLQ reprocessing).
    #[must_use]
    pub fn resume(&self, trace_id: TraceId, started_at: Timestamp) -> TraceRecorder<'_> {
        TraceRecorder {
            writer: self,
            trace_id,
            started_at,
        }
    }

    /// Masks a captured request for persistence.
    #[must_use]
    pub fn redact_request(&self, request: &CapturedRequest) -> CapturedRequest {
        CapturedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: mask_headers(&request.headers, &self.extra_secret_headers),
            body: request.body.as_deref().map(truncate_body),
        }
    }

    /// Reports a best-effort write failure.
    fn report_write_failure(&self, trace_id: &TraceId, err: &StoreError) {
        self.system_log.log(&SystemEvent {
            level: LogLevel::Error,
            component: "log_writer".to_string(),
            message: format!("trace {trace_id} step write failed: {err}"),
            org_id: None,
            metadata: Value::Null,
        });
    }
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Per-attempt recorder appending ordered steps to one trace.
pub struct TraceRecorder<'a> {
    /// Owning writer.
    writer: &'a ExecutionLogWriter,
    /// Trace being recorded.
    trace_id: TraceId,
    /// Trace start for duration deltas.
    started_at: Timestamp,
}

impl TraceRecorder<'_> {
    /// Returns the trace id under recording.
    #[must_use]
    pub const fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Appends one step; failures are reported but not propagated.
    pub fn step(&self, name: impl Into<String>, status: StepStatus, metadata: Value) {
        let now = self.writer.clock.now();
        let duration = now.millis_since(self.started_at).max(0);
        let step = TraceStep {
            name: name.into(),
            timestamp: now,
            duration_ms: u64::try_from(duration).unwrap_or(0),
            status,
            metadata,
        };
        if let Err(err) = self.writer.store.append_step(&self.trace_id, &step) {
            self.writer.report_write_failure(&self.trace_id, &err);
        }
    }

    /// Marks the trace in-flight status (RETRYING during DLQ reprocessing).
    pub fn set_status(&self, status: LogStatus) {
        if let Err(err) = self.writer.store.set_log_status(&self.trace_id, status) {
            self.writer.report_write_failure(&self.trace_id, &err);
        }
    }

    /// Writes the terminal fields of the trace.
    pub fn finish(
        &self,
        status: LogStatus,
        request: Option<&CapturedRequest>,
        response: Option<CapturedResponse>,
        error: Option<DeliveryError>,
    ) {
        let completion = LogCompletion {
            status,
            finished_at: self.writer.clock.now(),
            request: request.map(|request| self.writer.redact_request(request)),
            response,
            error,
        };
        if let Err(err) = self.writer.store.complete_log(&self.trace_id, &completion) {
            self.writer.report_write_failure(&self.trace_id, &err);
        }
    }
}
