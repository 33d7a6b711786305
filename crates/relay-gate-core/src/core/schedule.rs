// crates/relay-gate-core/src/core/schedule.rs
// ============================================================================
// Module: Relay Gate Scheduling Model
// Description: Pending deliveries, scheduled jobs, and job run logs.
// Purpose: Model time-triggered work as tagged, validated data.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Two kinds of time-triggered work exist: [`PendingDelivery`] rows fire
//! DELAYED or RECURRING deliveries through the event pipeline, and
//! [`ScheduledJob`]s run CRON/INTERVAL fetch-transform-deliver pipelines
//! against a data source. Missed windows are never replayed; only the next
//! occurrence runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::DeliveryError;
use crate::core::identifiers::DeliveryId;
use crate::core::identifiers::IntegrationId;
use crate::core::identifiers::JobId;
use crate::core::identifiers::OrgId;
use crate::core::integration::HttpMethod;
use crate::core::integration::OutgoingAuth;
use crate::core::integration::Transformation;
use crate::core::time::Timestamp;
use crate::core::trace::CapturedRequest;

// ============================================================================
// SECTION: Pending Delivery
// ============================================================================

/// Status of a scheduled delivery instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    /// Waiting for `scheduled_for`.
    Pending,
    /// Claimed by a scheduler worker.
    Running,
    /// Fired and completed.
    Done,
    /// Fired and failed.
    Failed,
    /// Cancelled before firing.
    Cancelled,
}

impl PendingStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firing schedule of a pending delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliverySchedule {
    /// Fire once at `scheduled_for`.
    Delayed,
    /// Fire repeatedly, advancing `scheduled_for` by `interval_ms`.
    Recurring {
        /// Interval between occurrences in milliseconds.
        interval_ms: u64,
        /// Optional occurrence budget.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_occurrences: Option<u32>,
        /// Optional end boundary; no occurrence fires at or after it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_at: Option<Timestamp>,
    },
}

/// One scheduled future delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelivery {
    /// Delivery identifier.
    pub id: DeliveryId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Integration to run when the delivery fires.
    pub integration_id: IntegrationId,
    /// Restricts the run to one action; `None` runs every action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_index: Option<u32>,
    /// Payload delivered as the synthetic event body.
    pub payload: Value,
    /// Firing schedule.
    pub schedule: DeliverySchedule,
    /// Next (or only) firing time.
    pub scheduled_for: Timestamp,
    /// Delivery status.
    pub status: PendingStatus,
    /// Claim attempts made so far.
    pub attempt: u32,
    /// Completed occurrences for recurring schedules.
    #[serde(default)]
    pub occurrences: u32,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

impl PendingDelivery {
    /// Computes the follow-up state after a recurring delivery fires.
    ///
    /// Returns the next `scheduled_for` when another occurrence is due, or
    /// `None` when the schedule has terminated.
    #[must_use]
    pub fn next_occurrence(&self, fired_at: Timestamp) -> Option<Timestamp> {
        match &self.schedule {
            DeliverySchedule::Delayed => None,
            DeliverySchedule::Recurring {
                interval_ms,
                max_occurrences,
                end_at,
            } => {
                let completed = self.occurrences.saturating_add(1);
                if max_occurrences.is_some_and(|budget| completed >= budget) {
                    return None;
                }
                let interval = i64::try_from(*interval_ms).unwrap_or(i64::MAX);
                let next = fired_at.saturating_add_millis(interval);
                if end_at.is_some_and(|end| next >= end) {
                    return None;
                }
                Some(next)
            }
        }
    }
}

// ============================================================================
// SECTION: Scheduled Job
// ============================================================================

/// Time trigger of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTrigger {
    /// CRON expression evaluated in a named timezone.
    Cron {
        /// Five or six field CRON expression.
        expression: String,
        /// IANA timezone name (`Europe/Berlin`).
        timezone: String,
    },
    /// Fixed interval in milliseconds.
    Interval {
        /// Interval between runs.
        interval_ms: u64,
    },
}

/// Data source fetched at the start of a job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobDataSource {
    /// SQL query against a tenant database.
    Sql {
        /// Tenant database location.
        database_path: String,
        /// Query executed with variable substitution.
        query: String,
    },
    /// Filter query against a state-store collection.
    DocumentQuery {
        /// Collection name.
        collection: String,
        /// Equality filter over document fields.
        filter: BTreeMap<String, Value>,
    },
    /// Internal HTTP API call.
    InternalApi {
        /// Absolute URL fetched with variable substitution.
        url: String,
        /// HTTP method for the fetch.
        method: HttpMethod,
    },
}

/// CRON/INTERVAL pull-transform-push job definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Job identifier.
    pub job_id: JobId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Operator-facing job name.
    pub name: String,
    /// Time trigger.
    pub trigger: JobTrigger,
    /// Data source fetched each run.
    pub data_source: JobDataSource,
    /// Transformation applied with fetched records as `payload.data`.
    pub transformation: Transformation,
    /// Delivery target URL.
    pub target_url: String,
    /// Delivery HTTP method.
    pub http_method: HttpMethod,
    /// Static headers merged into the delivery request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Outgoing authentication for the delivery.
    pub auth: OutgoingAuth,
    /// Per-run delivery timeout in milliseconds.
    pub timeout_ms: u64,
    /// Whether the job runs.
    pub is_active: bool,
    /// Last completed run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<Timestamp>,
    /// Next scheduled run.
    pub next_run_at: Timestamp,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Job Run Log
// ============================================================================

/// Outcome of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRunStatus {
    /// Fetch, transform, and delivery all succeeded.
    Success,
    /// Some stage failed; see the error field.
    Failed,
}

/// Record of one scheduled-job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobLog {
    /// Log identifier (unique per run).
    pub id: String,
    /// Job that ran.
    pub job_id: JobId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Run outcome.
    pub status: JobRunStatus,
    /// Run start time.
    pub started_at: Timestamp,
    /// Run finish time.
    pub finished_at: Timestamp,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Number of records the data source returned.
    pub records_fetched: u64,
    /// Fetched data, truncated.
    pub data_fetched: String,
    /// Transform output, truncated.
    pub transformed_payload: String,
    /// Delivery request snapshot (headers masked).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_request: Option<CapturedRequest>,
    /// Delivery response status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    /// Delivery response headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response_headers: BTreeMap<String, String>,
    /// Delivery response body, truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Reproducible curl command with secrets redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curl_command: Option<String>,
    /// Failure detail when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DeliveryError>,
}
