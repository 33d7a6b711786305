// crates/relay-gate-core/src/core/trace.rs
// ============================================================================
// Module: Relay Gate Execution Trace
// Description: Execution logs, ordered trace steps, capture, and redaction.
// Purpose: Preserve the full causal chain of every delivery attempt.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every delivery attempt produces exactly one [`ExecutionLog`] per matched
//! integration. Steps are appended in execution order and never rewritten.
//! Captured request and response bodies are truncated to a fixed size and
//! sensitive headers are masked before any record reaches the store.
//! Invariants:
//! - A terminal log has `finished_at >= started_at` and a non-empty `steps`
//!   list whose last status matches the trace status.
//! - Secrets never appear in persisted captures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::DeliveryError;
use crate::core::hashing::Fingerprint;
use crate::core::identifiers::IntegrationId;
use crate::core::identifiers::MessageId;
use crate::core::identifiers::OrgId;
use crate::core::identifiers::TraceId;
use crate::core::integration::Direction;
use crate::core::integration::HttpMethod;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Capture Limits
// ============================================================================

/// Maximum captured request or response body size in bytes.
pub const MAX_CAPTURED_BODY_BYTES: usize = 64 * 1024;
/// Replacement value for masked header values.
pub const MASKED_VALUE: &str = "***";

/// Header names always masked before persistence, lowercase.
const MASKED_HEADERS: &[&str] = &["authorization", "x-api-key", "proxy-authorization", "cookie"];

// ============================================================================
// SECTION: Step Names
// ============================================================================

/// Well-known step names recorded on execution traces.
pub mod step {
    /// Integration matching.
    pub const MATCH: &str = "match";
    /// Rate-limit admission.
    pub const RATE_LIMIT: &str = "rate_limit";
    /// Payload transformation.
    pub const TRANSFORM: &str = "transform";
    /// Outgoing-auth header construction.
    pub const AUTH: &str = "auth";
    /// HMAC signing.
    pub const SIGN: &str = "sign";
    /// Outbound HTTP request issuance.
    pub const HTTP_REQUEST: &str = "http_request";
    /// Outbound HTTP response receipt.
    pub const HTTP_RESPONSE: &str = "http_response";
    /// Inline retry scheduling.
    pub const RETRY: &str = "retry";
    /// Delay between consecutive actions.
    pub const ACTION_DELAY: &str = "action_delay";
    /// DLQ entry creation.
    pub const DLQ_ENQUEUE: &str = "dlq_enqueue";

    /// Returns the step name for an action boundary (`action:<index>`).
    #[must_use]
    pub fn action(index: usize) -> String {
        format!("action:{index}")
    }
}

// ============================================================================
// SECTION: Statuses
// ============================================================================

/// Terminal and in-flight statuses of an execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    /// Delivery is in flight.
    Pending,
    /// Every action delivered successfully.
    Success,
    /// Delivery failed terminally.
    Failed,
    /// Delivery is awaiting a DLQ retry.
    Retrying,
    /// Delivery exhausted DLQ retries.
    Abandoned,
}

impl LogStatus {
    /// Returns true for statuses that end the attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Abandoned)
    }

    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one trace step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step completed successfully.
    Success,
    /// Step failed.
    Failed,
    /// Step rejected the delivery (admission or policy).
    Rejected,
    /// Step was skipped (condition false, idempotent replay).
    Skipped,
}

// ============================================================================
// SECTION: Trigger Kind
// ============================================================================

/// What initiated a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Event drawn from a source adapter.
    Event,
    /// Synthetic event fired by the scheduler.
    Scheduled,
    /// DLQ reprocessing attempt.
    DlqRetry,
    /// Inbound HTTP push.
    Push,
    /// Scheduled-job pipeline run.
    Job,
}

// ============================================================================
// SECTION: Captures
// ============================================================================

/// Outbound request snapshot persisted on the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Target URL.
    pub url: String,
    /// Headers after masking.
    pub headers: BTreeMap<String, String>,
    /// Body after truncation, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Response snapshot persisted on the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Body after truncation.
    pub body: String,
    /// Wall-clock duration of the exchange in milliseconds.
    pub duration_ms: u64,
}

// ============================================================================
// SECTION: Trace Step
// ============================================================================

/// One ordered step within an execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Well-known step name.
    pub name: String,
    /// Time the step completed.
    pub timestamp: Timestamp,
    /// Wall-clock delta from trace start in milliseconds.
    pub duration_ms: u64,
    /// Step outcome.
    pub status: StepStatus,
    /// Step-specific metadata, secret-free.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

// ============================================================================
// SECTION: Execution Log
// ============================================================================

/// Root record of one delivery attempt across its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Trace identifier.
    pub trace_id: TraceId,
    /// Message identifier carried on signed requests.
    pub message_id: MessageId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Matched integration.
    pub integration_id: IntegrationId,
    /// Integration direction.
    pub direction: Direction,
    /// What initiated the attempt.
    pub trigger: TriggerKind,
    /// Deduplication fingerprint of the originating event.
    pub fingerprint: Fingerprint,
    /// Trace status.
    pub status: LogStatus,
    /// Attempt start time.
    pub started_at: Timestamp,
    /// Attempt finish time, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Wall-clock duration, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Ordered steps appended during execution.
    pub steps: Vec<TraceStep>,
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

impl ExecutionLog {
    /// Creates a pending log at trace start.
    #[must_use]
    pub fn begin(
        trace_id: TraceId,
        message_id: MessageId,
        org_id: OrgId,
        integration_id: IntegrationId,
        direction: Direction,
        trigger: TriggerKind,
        fingerprint: Fingerprint,
        started_at: Timestamp,
    ) -> Self {
        Self {
            trace_id,
            message_id,
            org_id,
            integration_id,
            direction,
            trigger,
            fingerprint,
            status: LogStatus::Pending,
            started_at,
            finished_at: None,
            duration_ms: None,
            steps: Vec::new(),
            request: None,
            response: None,
            error: None,
        }
    }
}

// ============================================================================
// SECTION: Redaction Helpers
// ============================================================================

/// Truncates a body to [`MAX_CAPTURED_BODY_BYTES`], appending a marker.
///
/// Truncation happens on a character boundary at or below the limit so the
/// stored value remains valid UTF-8.
#[must_use]
pub fn truncate_body(body: &str) -> String {
    truncate_body_at(body, MAX_CAPTURED_BODY_BYTES)
}

/// Truncates a body to `max_bytes`, appending a marker with the dropped size.
#[must_use]
pub fn truncate_body_at(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = body.len() - cut;
    format!("{}…[truncated {dropped} bytes]", &body[..cut])
}

/// Masks sensitive header values before persistence.
///
/// The built-in set (`Authorization`, `X-API-Key`, …) is always masked;
/// `extra_secret_headers` adds per-org names such as push secret headers.
#[must_use]
pub fn mask_headers(
    headers: &BTreeMap<String, String>,
    extra_secret_headers: &[String],
) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            let sensitive = MASKED_HEADERS.contains(&lowered.as_str())
                || extra_secret_headers.iter().any(|extra| extra.eq_ignore_ascii_case(name));
            let masked = if sensitive {
                MASKED_VALUE.to_string()
            } else {
                value.clone()
            };
            (name.clone(), masked)
        })
        .collect()
}
