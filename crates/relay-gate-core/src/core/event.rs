// crates/relay-gate-core/src/core/event.rs
// ============================================================================
// Module: Relay Gate Event Model
// Description: Normalized events, source configurations, and checkpoints.
// Purpose: Model the ingestion side of the gateway as tagged, validated data.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Source adapters turn tenant-configured external systems into a stream of
//! [`NormalizedEvent`]s. Each event carries the [`Fingerprint`] used as the
//! delivery-log idempotency key. [`SourceCheckpoint`]s record the resume
//! cursor per `(org, source kind)` and must only ever advance.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::Fingerprint;
use crate::core::identifiers::EntityRid;
use crate::core::identifiers::OrgId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Source Bounds
// ============================================================================

/// Minimum polling interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
/// Maximum polling interval in milliseconds.
pub const MAX_POLL_INTERVAL_MS: u64 = 300_000;
/// Minimum polling batch size.
pub const MIN_SOURCE_BATCH_SIZE: u32 = 1;
/// Maximum polling batch size.
pub const MAX_SOURCE_BATCH_SIZE: u32 = 100;
/// Minimum tenant-database statement timeout in milliseconds.
pub const MIN_DB_TIMEOUT_MS: u64 = 1_000;
/// Maximum tenant-database statement timeout in milliseconds.
pub const MAX_DB_TIMEOUT_MS: u64 = 120_000;
/// Minimum per-org source connection pool size.
pub const MIN_SOURCE_CONNECTIONS: u32 = 1;
/// Maximum per-org source connection pool size.
pub const MAX_SOURCE_CONNECTIONS: u32 = 5;

// ============================================================================
// SECTION: Source Kind
// ============================================================================

/// Stable source-kind labels used in fingerprints and checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Polled relational table.
    PollingSql,
    /// Message-broker topic consumer.
    Stream,
    /// Authenticated HTTP push endpoint.
    HttpPush,
    /// Synthetic events injected by the scheduler.
    Scheduler,
}

impl SourceType {
    /// Returns a stable label for fingerprints and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PollingSql => "polling_sql",
            Self::Stream => "stream",
            Self::HttpPush => "http_push",
            Self::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Source Configuration
// ============================================================================

/// Column mapping from logical event fields to physical table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Monotonic row identifier column.
    pub id: String,
    /// Event type column.
    pub event_type: String,
    /// Optional entity identifier column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_rid: Option<String>,
    /// JSON payload column.
    pub payload: String,
}

/// Polling-SQL source parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingSqlSourceConfig {
    /// Tenant database location.
    pub database_path: String,
    /// Table polled for new rows.
    pub table: String,
    /// Logical-to-physical column mapping discovered at setup time.
    pub columns: ColumnMapping,
    /// Poll interval in milliseconds, clamped to 1s..=300s.
    pub poll_interval_ms: u64,
    /// Rows fetched per cycle, clamped to 1..=100.
    pub batch_size: u32,
    /// Statement timeout in milliseconds, clamped to 1s..=120s.
    pub db_timeout_ms: u64,
    /// Dedicated pool size, clamped to 1..=5.
    pub connection_limit: u32,
}

/// Stream source parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSourceConfig {
    /// Topic consumed for tenant events.
    pub topic: String,
    /// Event type assigned when messages omit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_event_type: Option<String>,
}

/// HTTP-push source parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPushSourceConfig {
    /// Header carrying the shared secret.
    pub secret_header: String,
    /// Shared secret expected from callers.
    pub shared_secret: String,
    /// Optional JSON schema validated against the pushed payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_schema: Option<Value>,
}

/// Tagged per-org source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Polled relational table.
    PollingSql(PollingSqlSourceConfig),
    /// Message-broker topic consumer.
    Stream(StreamSourceConfig),
    /// Authenticated HTTP push endpoint.
    HttpPush(HttpPushSourceConfig),
}

impl SourceKind {
    /// Returns the stable source type for this configuration.
    #[must_use]
    pub const fn source_type(&self) -> SourceType {
        match self {
            Self::PollingSql(_) => SourceType::PollingSql,
            Self::Stream(_) => SourceType::Stream,
            Self::HttpPush(_) => SourceType::HttpPush,
        }
    }
}

/// Per-org ingestion configuration; one active per org.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSourceConfig {
    /// Owning organization.
    pub org_id: OrgId,
    /// Source kind and parameters.
    pub source: SourceKind,
    /// Whether the source feeds the delivery pipeline.
    pub is_active: bool,
    /// Last update timestamp, used for adapter reload detection.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Checkpoint
// ============================================================================

/// Persistence cursor for a source, advanced only after successful enqueue.
///
/// # Invariants
/// - Cursors are monotone: `advances` must hold before a store update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceCheckpoint {
    /// Last processed row id for polling-SQL sources.
    RowId {
        /// Highest fully-enqueued row id.
        last_row_id: i64,
    },
    /// Committed offsets per partition for stream sources.
    StreamOffsets {
        /// Next-to-consume offset keyed by partition.
        offsets: BTreeMap<i32, i64>,
    },
}

impl SourceCheckpoint {
    /// Returns true when `self` strictly or trivially advances `previous`.
    ///
    /// Row cursors must be non-decreasing; stream offsets must be
    /// non-decreasing per partition.
    #[must_use]
    pub fn advances(&self, previous: &Self) -> bool {
        match (self, previous) {
            (
                Self::RowId {
                    last_row_id: next,
                },
                Self::RowId {
                    last_row_id: prev,
                },
            ) => next >= prev,
            (
                Self::StreamOffsets {
                    offsets: next,
                },
                Self::StreamOffsets {
                    offsets: prev,
                },
            ) => prev.iter().all(|(partition, offset)| {
                next.get(partition).is_none_or(|candidate| candidate >= offset)
            }),
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Normalized Event
// ============================================================================

/// Normalized event produced by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Owning organization.
    pub org_id: OrgId,
    /// Event type used for matching.
    pub event_type: String,
    /// Optional entity the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_rid: Option<EntityRid>,
    /// Event payload handed to transformations.
    pub payload: Value,
    /// Source-assigned event identifier.
    pub source_event_id: String,
    /// Time the source produced the event.
    pub produced_at: Timestamp,
    /// Deduplication fingerprint over `(org, source type, source event id)`.
    pub fingerprint: Fingerprint,
}
