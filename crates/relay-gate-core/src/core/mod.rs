// crates/relay-gate-core/src/core/mod.rs
// ============================================================================
// Module: Relay Gate Core Types
// Description: Canonical data model for the gateway.
// Purpose: Group identifier, event, integration, trace, and schedule types.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The core module holds the persisted and in-flight data model shared by
//! every other crate in the workspace. Types here are plain data; behavior
//! lives in [`crate::runtime`] and the store implementations.

/// Dead-letter queue model.
pub mod dlq;
/// Error taxonomy.
pub mod error;
/// Normalized events, sources, and checkpoints.
pub mod event;
/// Canonical hashing and fingerprints.
pub mod hashing;
/// Opaque identifiers.
pub mod identifiers;
/// Integration configurations and policies.
pub mod integration;
/// Lookup tables.
pub mod lookup;
/// Pending deliveries and scheduled jobs.
pub mod schedule;
/// Timestamps and clocks.
pub mod time;
/// Execution traces.
pub mod trace;

pub use dlq::DlqEntry;
pub use dlq::DlqStatus;
pub use dlq::MAX_BULK_DLQ_IDS;
pub use error::DeliveryError;
pub use error::ErrorCategory;
pub use event::ColumnMapping;
pub use event::EventSourceConfig;
pub use event::HttpPushSourceConfig;
pub use event::NormalizedEvent;
pub use event::PollingSqlSourceConfig;
pub use event::SourceCheckpoint;
pub use event::SourceKind;
pub use event::SourceType;
pub use event::StreamSourceConfig;
pub use hashing::Fingerprint;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::event_fingerprint;
pub use hashing::random_id;
pub use hashing::sha256_hex;
pub use identifiers::DeliveryId;
pub use identifiers::DlqId;
pub use identifiers::EntityRid;
pub use identifiers::IntegrationId;
pub use identifiers::JobId;
pub use identifiers::MessageId;
pub use identifiers::OrgId;
pub use identifiers::TraceId;
pub use integration::ActionConfig;
pub use integration::CompareOp;
pub use integration::Condition;
pub use integration::Direction;
pub use integration::EVENT_TYPE_WILDCARD;
pub use integration::FieldMapping;
pub use integration::Formatter;
pub use integration::HttpMethod;
pub use integration::IntegrationConfig;
pub use integration::IntegrationConfigError;
pub use integration::LookupKind;
pub use integration::LookupSpec;
pub use integration::OutgoingAuth;
pub use integration::RateLimitPolicy;
pub use integration::Scope;
pub use integration::Transformation;
pub use lookup::LookupEntry;
pub use lookup::LookupTable;
pub use schedule::DeliverySchedule;
pub use schedule::JobDataSource;
pub use schedule::JobRunStatus;
pub use schedule::JobTrigger;
pub use schedule::PendingDelivery;
pub use schedule::PendingStatus;
pub use schedule::ScheduledJob;
pub use schedule::ScheduledJobLog;
pub use time::Clock;
pub use time::ManualClock;
pub use time::SystemClock;
pub use time::Timestamp;
pub use trace::CapturedRequest;
pub use trace::CapturedResponse;
pub use trace::ExecutionLog;
pub use trace::LogStatus;
pub use trace::MASKED_VALUE;
pub use trace::MAX_CAPTURED_BODY_BYTES;
pub use trace::StepStatus;
pub use trace::TraceStep;
pub use trace::TriggerKind;
pub use trace::mask_headers;
pub use trace::step;
pub use trace::truncate_body;
pub use trace::truncate_body_at;
