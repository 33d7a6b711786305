// crates/relay-gate-core/src/core/dlq.rs
// ============================================================================
// Module: Relay Gate Dead-Letter Queue Model
// Description: DLQ entries, statuses, and retry bookkeeping.
// Purpose: Persist failed deliveries awaiting retry or manual disposition.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`DlqEntry`] is created when a delivery exhausts inline retries or is
//! rejected at admission. The DLQ worker reprocesses entries on exponential
//! backoff; entries that reach `max_retries` are promoted to `ABANDONED` and
//! raise an alert. Manual operations may force a retry, abandon with notes,
//! or delete an entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::DeliveryError;
use crate::core::identifiers::DlqId;
use crate::core::identifiers::IntegrationId;
use crate::core::identifiers::OrgId;
use crate::core::identifiers::TraceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle of a DLQ entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqStatus {
    /// Waiting for `next_retry_at`.
    PendingRetry,
    /// Claimed by a DLQ worker.
    Retrying,
    /// Reprocessing succeeded.
    Resolved,
    /// Retries exhausted or manually abandoned.
    Abandoned,
}

impl DlqStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingRetry => "PENDING_RETRY",
            Self::Retrying => "RETRYING",
            Self::Resolved => "RESOLVED",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Entry
// ============================================================================

/// Persisted failed delivery awaiting retry or manual disposition.
///
/// # Invariants
/// - `retry_count <= max_retries` while `PENDING_RETRY` or `RETRYING`.
/// - `next_retry_at` is meaningful only while `PENDING_RETRY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Entry identifier.
    pub dlq_id: DlqId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Integration that failed.
    pub integration_id: IntegrationId,
    /// Index of the action that failed.
    pub action_index: u32,
    /// Trace of the failing attempt.
    pub trace_id: TraceId,
    /// Original (pre-transform) payload to redeliver.
    pub payload: Value,
    /// Last delivery error.
    pub error: DeliveryError,
    /// Completed reprocessing attempts.
    pub retry_count: u32,
    /// Retry budget before abandonment.
    pub max_retries: u32,
    /// Earliest time the next retry may run.
    pub next_retry_at: Timestamp,
    /// Entry status.
    pub status: DlqStatus,
    /// Time the original delivery failed.
    pub failed_at: Timestamp,
    /// Operator notes recorded on manual abandonment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DlqEntry {
    /// Returns true when the entry has exhausted its retry budget.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Maximum IDs accepted by bulk DLQ operations.
pub const MAX_BULK_DLQ_IDS: usize = 100;
