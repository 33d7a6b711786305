// crates/relay-gate-workers/src/pipeline.rs
// ============================================================================
// Module: Delivery Pipeline
// Description: Condition, admission, transform, auth, sign, HTTP, retry, DLQ.
// Purpose: Execute one matched integration against one event, fully traced.
// Dependencies: relay-gate-core, tokio, rand, serde_json
// ============================================================================

//! ## Overview
//! The pipeline runs every action of a matched integration in order:
//! condition gate, rate-limit admission, transformation, auth headers,
//! signing, and the HTTP call with inline retries on retryable categories.
//! Exhausted retryable failures and admission rejections enqueue a DLQ
//! entry; `AUTH`, `VALIDATION`, `SSRF`, and `TRANSFORMATION` fail the trace
//! without one. A failed action does not short-circuit later actions unless
//! the integration sets `halt_on_error`.
//!
//! Invariants:
//! - Exactly one execution log exists per `(event, integration)` attempt
//!   chain; DLQ reprocessing reopens the original trace instead of forking.
//! - The integration snapshot taken at trace start is immune to concurrent
//!   configuration changes.
//! - Remote 429 responses are never retried inline; `Retry-After` feeds the
//!   DLQ schedule when present.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use relay_gate_core::ActionConfig;
use relay_gate_core::CapturedRequest;
use relay_gate_core::CapturedResponse;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryError;
use relay_gate_core::DlqEntry;
use relay_gate_core::DlqId;
use relay_gate_core::DlqStatus;
use relay_gate_core::ErrorCategory;
use relay_gate_core::ExecutionLog;
use relay_gate_core::IntegrationConfig;
use relay_gate_core::LogStatus;
use relay_gate_core::MessageId;
use relay_gate_core::MetricEvent;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::StepStatus;
use relay_gate_core::Timestamp;
use relay_gate_core::TraceId;
use relay_gate_core::TriggerKind;
use relay_gate_core::interfaces::AuthHeaderBuilder;
use relay_gate_core::interfaces::DispatchOutcome;
use relay_gate_core::interfaces::DispatchResponse;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::OutboundRequest;
use relay_gate_core::interfaces::RequestDispatcher;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::StoreError;
use relay_gate_core::random_id;
use relay_gate_core::runtime::Admission;
use relay_gate_core::runtime::INLINE_RETRY_CAP_MS;
use relay_gate_core::runtime::RateLimiter;
use relay_gate_core::runtime::TransformContext;
use relay_gate_core::runtime::TransformExecutor;
use relay_gate_core::runtime::dlq_retry_delay_ms;
use relay_gate_core::runtime::exponential_delay_ms;
use relay_gate_core::runtime::signing_headers;
use relay_gate_core::runtime::with_jitter;
use relay_gate_core::step;
use serde_json::Value;
use serde_json::json;
use tokio::sync::watch;

use crate::alerts::AlertCenter;
use crate::log_writer::ExecutionLogWriter;
use crate::log_writer::TraceRecorder;

// ============================================================================
// SECTION: Settings and Dependencies
// ============================================================================

/// Injected pipeline collaborators.
pub struct PipelineDeps {
    /// State store for logs, DLQ, and rate-limit counters.
    pub store: Arc<dyn StateStore>,
    /// Outbound HTTP seam.
    pub dispatcher: Arc<dyn RequestDispatcher>,
    /// Outgoing-auth header builder.
    pub auth: Arc<dyn AuthHeaderBuilder>,
    /// Transformation executor.
    pub transforms: Arc<TransformExecutor>,
    /// Trace writer.
    pub writer: Arc<ExecutionLogWriter>,
    /// Clock shared with the workers.
    pub clock: Arc<dyn Clock>,
    /// Metrics sink.
    pub metrics: Arc<dyn GatewayMetrics>,
    /// Alert evaluation.
    pub alerts: Arc<AlertCenter>,
    /// Shutdown signal; a true value cancels in-flight deliveries.
    pub cancel: watch::Receiver<bool>,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Retry budget for DLQ entries created by this pipeline.
    pub dlq_max_retries: u32,
    /// Delay between actions when the integration sets none.
    pub default_multi_action_delay_ms: u64,
    /// Inline-retry backoff base in milliseconds.
    pub retry_base_ms: u64,
    /// Allowlisted environment snapshot for `{{env.NAME}}` substitution.
    pub env: BTreeMap<String, String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dlq_max_retries: 5,
            default_multi_action_delay_ms: 0,
            retry_base_ms: 1_000,
            env: BTreeMap::new(),
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A terminal log already existed; the event was not re-delivered.
    Skipped,
    /// The attempt completed with the given trace and status.
    Completed {
        /// Trace recording the attempt.
        trace_id: TraceId,
        /// Terminal trace status.
        status: LogStatus,
    },
}

// ============================================================================
// SECTION: Action Outcome
// ============================================================================

/// Result of running one action.
struct ActionOutcome {
    /// Failure, when the action did not succeed; `None` covers skips.
    error: Option<DeliveryError>,
    /// Last issued request snapshot.
    request: Option<CapturedRequest>,
    /// Last received response snapshot.
    response: Option<CapturedResponse>,
}

impl ActionOutcome {
    /// Outcome for a skipped or successful action.
    const fn clean(request: Option<CapturedRequest>, response: Option<CapturedResponse>) -> Self {
        Self {
            error: None,
            request,
            response,
        }
    }

    /// Outcome for a failed action.
    const fn failed(
        error: DeliveryError,
        request: Option<CapturedRequest>,
        response: Option<CapturedResponse>,
    ) -> Self {
        Self {
            error: Some(error),
            request,
            response,
        }
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// The delivery pipeline shared by the delivery, scheduler, and DLQ workers.
pub struct DeliveryPipeline {
    /// Injected collaborators.
    deps: PipelineDeps,
    /// Tuning knobs.
    settings: PipelineSettings,
}

impl DeliveryPipeline {
    /// Creates a pipeline over the given collaborators.
    #[must_use]
    pub const fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            deps,
            settings,
        }
    }

    /// Runs one event against one matched integration.
    ///
    /// `action_filter` restricts the run to a single action (scheduled
    /// deliveries targeting one action); `None` runs every action in order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the trace cannot be created; every
    /// later failure is recorded on the trace instead.
    pub async fn run_event(
        &self,
        event: &NormalizedEvent,
        integration: &IntegrationConfig,
        trigger: TriggerKind,
        action_filter: Option<u32>,
    ) -> Result<RunOutcome, StoreError> {
        if matches!(trigger, TriggerKind::Event | TriggerKind::Push)
            && self.deps.store.has_terminal_log(
                event.org_id,
                &event.fingerprint,
                &integration.id,
            )?
        {
            return Ok(RunOutcome::Skipped);
        }

        let trace_id = TraceId::new(random_id("trace"));
        let message_id = MessageId::new(random_id("msg"));
        let started_at = self.deps.clock.now();
        let log = ExecutionLog::begin(
            trace_id.clone(),
            message_id.clone(),
            event.org_id,
            integration.id.clone(),
            integration.direction,
            trigger,
            event.fingerprint.clone(),
            started_at,
        );
        let recorder = self.deps.writer.begin(&log)?;
        recorder.step(
            step::MATCH,
            StepStatus::Success,
            json!({
                "integration_name": integration.integration_name,
                "actions": integration.actions.len(),
            }),
        );

        let mut last_request = None;
        let mut last_response = None;
        let mut first_error: Option<DeliveryError> = None;
        let action_count = integration.actions.len();
        for (index, action) in integration.actions.iter().enumerate() {
            if let Some(filter) = action_filter
                && usize::try_from(filter).ok() != Some(index)
            {
                continue;
            }
            let outcome = self
                .run_action(&recorder, event, integration, action, index, &message_id, false)
                .await;
            if outcome.request.is_some() {
                last_request = outcome.request;
            }
            if outcome.response.is_some() {
                last_response = outcome.response;
            }
            if let Some(error) = outcome.error {
                if first_error.is_none() {
                    first_error = Some(error);
                }
                if integration.halt_on_error {
                    break;
                }
            }
            let is_last = index + 1 >= action_count;
            if !is_last && action_filter.is_none() {
                let delay_ms = if integration.multi_action_delay_ms > 0 {
                    integration.multi_action_delay_ms
                } else {
                    self.settings.default_multi_action_delay_ms
                };
                if delay_ms > 0 {
                    recorder.step(
                        step::ACTION_DELAY,
                        StepStatus::Success,
                        json!({ "delay_ms": delay_ms }),
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        let status = if first_error.is_some() {
            LogStatus::Failed
        } else {
            LogStatus::Success
        };
        recorder.finish(status, last_request.as_ref(), last_response, first_error.clone());
        let duration = self.deps.clock.now().millis_since(started_at).max(0);
        self.deps.metrics.record(&MetricEvent::DeliveryCompleted {
            org_id: event.org_id,
            category: first_error.as_ref().map(|error| error.category),
            duration_ms: u64::try_from(duration).unwrap_or(0),
        });
        if first_error.is_some() {
            self.deps.alerts.record_failure(event.org_id, self.deps.clock.now());
        }
        Ok(RunOutcome::Completed {
            trace_id,
            status,
        })
    }

    /// Reprocesses one DLQ entry against its original trace.
    ///
    /// Returns `None` on success; otherwise the failure for rescheduling.
    /// The trace is moved to `RETRYING` for the attempt and back to a
    /// terminal status only on success (the DLQ worker decides abandonment).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the original trace cannot be read.
    pub async fn run_dlq_retry(
        &self,
        entry: &DlqEntry,
        integration: &IntegrationConfig,
    ) -> Result<Option<DeliveryError>, StoreError> {
        let original = self.deps.store.execution_log(&entry.trace_id)?;
        let started_at =
            original.as_ref().map_or_else(|| self.deps.clock.now(), |log| log.started_at);
        let recorder = self.deps.writer.resume(entry.trace_id.clone(), started_at);
        recorder.set_status(LogStatus::Retrying);
        recorder.step(
            step::RETRY,
            StepStatus::Success,
            json!({
                "dlq_id": entry.dlq_id.as_str(),
                "retry_count": entry.retry_count,
            }),
        );

        let message_id = original
            .map_or_else(|| MessageId::new(random_id("msg")), |log| log.message_id);
        let synthetic = NormalizedEvent {
            org_id: entry.org_id,
            event_type: String::new(),
            entity_rid: None,
            payload: entry.payload.clone(),
            source_event_id: entry.dlq_id.as_str().to_string(),
            produced_at: self.deps.clock.now(),
            fingerprint: event_fingerprint(entry.org_id, "dlq_retry", entry.dlq_id.as_str())
                .map_err(|err| StoreError::Invalid(err.to_string()))?,
        };
        let action_index = usize::try_from(entry.action_index).unwrap_or(usize::MAX);
        let Some(action) = integration.actions.get(action_index) else {
            return Ok(Some(DeliveryError::new(
                ErrorCategory::Internal,
                "action_missing",
                format!("integration no longer has action {action_index}"),
            )));
        };
        let outcome = self
            .run_action(
                &recorder,
                &synthetic,
                integration,
                action,
                action_index,
                &message_id,
                true,
            )
            .await;
        match outcome.error {
            None => {
                recorder.finish(
                    LogStatus::Success,
                    outcome.request.as_ref(),
                    outcome.response,
                    None,
                );
                Ok(None)
            }
            Some(error) => {
                recorder.set_status(LogStatus::Retrying);
                Ok(Some(error))
            }
        }
    }

    /// Runs one action end to end, recording every step.
    #[allow(
        clippy::too_many_lines,
        reason = "The action sequence reads best as one ordered block."
    )]
    async fn run_action(
        &self,
        recorder: &TraceRecorder<'_>,
        event: &NormalizedEvent,
        integration: &IntegrationConfig,
        action: &ActionConfig,
        index: usize,
        message_id: &MessageId,
        dlq_mode: bool,
    ) -> ActionOutcome {
        let ctx = TransformContext {
            org_id: event.org_id,
            now: self.deps.clock.now(),
            env: self.settings.env.clone(),
        };

        // Condition gate.
        if let Some(condition) = &action.condition {
            match self.deps.transforms.evaluate_condition(condition, &event.payload) {
                Ok(true) => {}
                Ok(false) => {
                    recorder.step(
                        step::action(index),
                        StepStatus::Skipped,
                        json!({ "reason": "condition_false" }),
                    );
                    return ActionOutcome::clean(None, None);
                }
                Err(err) => {
                    let error = err.into_delivery_error();
                    recorder.step(
                        step::action(index),
                        StepStatus::Failed,
                        json!({ "error": error.to_string() }),
                    );
                    return ActionOutcome::failed(error, None, None);
                }
            }
        }
        recorder.step(
            step::action(index),
            StepStatus::Success,
            json!({ "target_url": action.target_url }),
        );

        // Rate-limit admission.
        if integration.rate_limits.enabled {
            let limiter = RateLimiter::new(self.deps.store.as_ref());
            match limiter.check(&integration.id, &integration.rate_limits, ctx.now) {
                Ok(Admission::Admitted {
                    remaining,
                }) => {
                    recorder.step(
                        step::RATE_LIMIT,
                        StepStatus::Success,
                        json!({ "remaining": remaining }),
                    );
                }
                Ok(Admission::Rejected {
                    retry_at,
                }) => {
                    recorder.step(
                        step::RATE_LIMIT,
                        StepStatus::Rejected,
                        json!({ "retry_at": retry_at.as_unix_millis() }),
                    );
                    self.deps.metrics.record(&MetricEvent::RateLimited {
                        integration_id: integration.id.clone(),
                    });
                    let error = DeliveryError::new(
                        ErrorCategory::RateLimit,
                        "admission_rejected",
                        "delivery rejected by fixed-window rate limit",
                    );
                    if !dlq_mode {
                        self.enqueue_dlq(recorder, event, integration, index, &error, retry_at);
                    }
                    return ActionOutcome::failed(error, None, None);
                }
                Err(err) => {
                    let error = DeliveryError::new(
                        ErrorCategory::Internal,
                        "rate_limit_store",
                        err.to_string(),
                    );
                    recorder.step(
                        step::RATE_LIMIT,
                        StepStatus::Failed,
                        json!({ "error": error.to_string() }),
                    );
                    return ActionOutcome::failed(error, None, None);
                }
            }
        }

        // Transformation.
        let transformed = match self.deps.transforms.apply(
            &action.transformation,
            &event.payload,
            &ctx,
        ) {
            Ok(value) => {
                recorder.step(step::TRANSFORM, StepStatus::Success, Value::Null);
                value
            }
            Err(err) => {
                let error = err.into_delivery_error();
                recorder.step(
                    step::TRANSFORM,
                    StepStatus::Failed,
                    json!({ "error": error.to_string() }),
                );
                return ActionOutcome::failed(error, None, None);
            }
        };

        // Outgoing auth.
        let auth_headers = match self
            .deps
            .auth
            .build(event.org_id, &integration.id, &action.auth)
            .await
        {
            Ok(headers) => {
                recorder.step(
                    step::AUTH,
                    StepStatus::Success,
                    json!({ "auth_type": action.auth.kind() }),
                );
                headers
            }
            Err(error) => {
                recorder.step(
                    step::AUTH,
                    StepStatus::Failed,
                    json!({ "error": error.to_string() }),
                );
                return ActionOutcome::failed(error, None, None);
            }
        };

        // Body and headers.
        let body = action
            .http_method
            .has_body()
            .then(|| serde_json::to_string(&transformed).unwrap_or_default());
        let mut headers = action.headers.clone();
        headers.extend(auth_headers);
        headers.insert("X-Trace-Id".to_string(), recorder.trace_id().as_str().to_string());

        // Signing.
        if integration.signing_enabled {
            let raw_body = body.as_deref().unwrap_or("");
            match signing_headers(
                &integration.signing_secrets,
                message_id,
                ctx.now.as_unix_seconds(),
                raw_body,
            ) {
                Ok(signed) => {
                    recorder.step(
                        step::SIGN,
                        StepStatus::Success,
                        json!({ "secrets": integration.signing_secrets.len() }),
                    );
                    headers.extend(signed);
                }
                Err(err) => {
                    let error = DeliveryError::new(
                        ErrorCategory::Auth,
                        "signing_secret",
                        err.to_string(),
                    );
                    recorder.step(
                        step::SIGN,
                        StepStatus::Failed,
                        json!({ "error": error.to_string() }),
                    );
                    return ActionOutcome::failed(error, None, None);
                }
            }
        }

        let request = OutboundRequest {
            method: action.http_method,
            url: action.target_url.clone(),
            headers,
            body,
            timeout_ms: integration.timeout_ms,
        };
        let captured_request = CapturedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        // HTTP attempts with inline retry.
        let max_attempts = if dlq_mode { 0 } else { integration.retry_count };
        let mut attempt: u32 = 0;
        loop {
            let Some(outcome) = self.dispatch_unless_cancelled(&request).await else {
                let error = cancelled_error();
                recorder.step(
                    step::HTTP_REQUEST,
                    StepStatus::Failed,
                    json!({ "category": error.category.as_str() }),
                );
                return ActionOutcome::failed(error, Some(captured_request), None);
            };
            match outcome {
                DispatchOutcome::Success(response) => {
                    recorder.step(
                        step::HTTP_REQUEST,
                        StepStatus::Success,
                        json!({ "attempt": attempt, "duration_ms": response.duration_ms }),
                    );
                    recorder.step(
                        step::HTTP_RESPONSE,
                        StepStatus::Success,
                        json!({ "status": response.status }),
                    );
                    return ActionOutcome::clean(
                        Some(captured_request),
                        Some(captured_response(&response)),
                    );
                }
                DispatchOutcome::Failure {
                    error,
                    response,
                    retry_after_ms,
                } => {
                    if error.category == ErrorCategory::Ssrf {
                        recorder.step(
                            step::HTTP_REQUEST,
                            StepStatus::Rejected,
                            json!({ "category": error.category.as_str() }),
                        );
                        return ActionOutcome::failed(error, Some(captured_request), None);
                    }
                    recorder.step(
                        step::HTTP_REQUEST,
                        StepStatus::Success,
                        json!({ "attempt": attempt }),
                    );
                    let response_capture = response.as_ref().map(captured_response);
                    if let Some(capture) = &response_capture {
                        recorder.step(
                            step::HTTP_RESPONSE,
                            StepStatus::Failed,
                            json!({
                                "status": capture.status,
                                "category": error.category.as_str(),
                            }),
                        );
                    }

                    let inline_retryable = error.category.is_retryable()
                        && error.category != ErrorCategory::RateLimit;
                    if inline_retryable && attempt < max_attempts {
                        let delay_ms = with_jitter(
                            exponential_delay_ms(
                                self.settings.retry_base_ms,
                                attempt,
                                INLINE_RETRY_CAP_MS,
                            ),
                            &mut thread_rng(),
                        );
                        recorder.step(
                            step::RETRY,
                            StepStatus::Success,
                            json!({ "attempt": attempt, "delay_ms": delay_ms }),
                        );
                        if !self.sleep_unless_cancelled(delay_ms).await {
                            let error = cancelled_error();
                            return ActionOutcome::failed(
                                error,
                                Some(captured_request),
                                response_capture,
                            );
                        }
                        attempt += 1;
                        continue;
                    }

                    if error.category.is_retryable() && !dlq_mode {
                        let next_retry_at = retry_after_ms.map_or_else(
                            || {
                                let delay = dlq_retry_delay_ms(0, &mut thread_rng());
                                self.deps
                                    .clock
                                    .now()
                                    .saturating_add_millis(i64::try_from(delay).unwrap_or(0))
                            },
                            |after| {
                                self.deps
                                    .clock
                                    .now()
                                    .saturating_add_millis(i64::try_from(after).unwrap_or(0))
                            },
                        );
                        self.enqueue_dlq(
                            recorder,
                            event,
                            integration,
                            index,
                            &error,
                            next_retry_at,
                        );
                    }
                    return ActionOutcome::failed(
                        error,
                        Some(captured_request),
                        response_capture,
                    );
                }
            }
        }
    }

    /// Dispatches unless shutdown cancels the delivery first.
    async fn dispatch_unless_cancelled(
        &self,
        request: &OutboundRequest,
    ) -> Option<DispatchOutcome> {
        let mut cancel = self.deps.cancel.clone();
        tokio::select! {
            outcome = self.deps.dispatcher.dispatch(request) => Some(outcome),
            () = cancelled(&mut cancel) => None,
        }
    }

    /// Sleeps between retries; returns false when shutdown cancels the wait.
    async fn sleep_unless_cancelled(&self, delay_ms: u64) -> bool {
        let mut cancel = self.deps.cancel.clone();
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
            () = cancelled(&mut cancel) => false,
        }
    }

    /// Creates one DLQ entry and records its step.
    fn enqueue_dlq(
        &self,
        recorder: &TraceRecorder<'_>,
        event: &NormalizedEvent,
        integration: &IntegrationConfig,
        action_index: usize,
        error: &DeliveryError,
        next_retry_at: Timestamp,
    ) {
        let entry = DlqEntry {
            dlq_id: DlqId::new(random_id("dlq")),
            org_id: event.org_id,
            integration_id: integration.id.clone(),
            action_index: u32::try_from(action_index).unwrap_or(0),
            trace_id: recorder.trace_id().clone(),
            payload: event.payload.clone(),
            error: error.clone(),
            retry_count: 0,
            max_retries: self.settings.dlq_max_retries,
            next_retry_at,
            status: DlqStatus::PendingRetry,
            failed_at: self.deps.clock.now(),
            notes: None,
        };
        match self.deps.store.insert_dlq(&entry) {
            Ok(()) => {
                recorder.step(
                    step::DLQ_ENQUEUE,
                    StepStatus::Success,
                    json!({
                        "dlq_id": entry.dlq_id.as_str(),
                        "next_retry_at": entry.next_retry_at.as_unix_millis(),
                        "category": error.category.as_str(),
                    }),
                );
            }
            Err(err) => {
                recorder.step(
                    step::DLQ_ENQUEUE,
                    StepStatus::Failed,
                    json!({ "error": err.to_string() }),
                );
            }
        }
    }
}

/// Resolves once the shutdown flag turns true; pends forever when the
/// sender is gone without flipping it (tests, detached pipelines).
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Builds the error recorded on deliveries cut off by shutdown.
fn cancelled_error() -> DeliveryError {
    DeliveryError::new(
        ErrorCategory::Cancelled,
        "shutdown",
        "delivery aborted by gateway shutdown",
    )
}

/// Converts a dispatch response into its persisted capture.
fn captured_response(response: &DispatchResponse) -> CapturedResponse {
    CapturedResponse {
        status: response.status,
        headers: response.headers.clone(),
        body: response.body.clone(),
        duration_ms: response.duration_ms,
    }
}
