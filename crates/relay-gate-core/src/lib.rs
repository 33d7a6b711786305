// crates/relay-gate-core/src/lib.rs
// ============================================================================
// Module: Relay Gate Core Library
// Description: Public API surface for the Relay Gate core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Relay Gate core provides the tenant-scoped data model, the backend seams
//! (state store, event sources, HTTP dispatch, script sandbox), and the
//! deterministic runtime helpers (matching, admission, transformation,
//! signing, backoff) that the worker crates compose into the delivery
//! pipeline. The crate performs no I/O of its own.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AlertKind;
pub use interfaces::AlertSink;
pub use interfaces::AuthHeaderBuilder;
pub use interfaces::CheckpointStore;
pub use interfaces::DispatchOutcome;
pub use interfaces::DispatchResponse;
pub use interfaces::DlqStore;
pub use interfaces::EventSource;
pub use interfaces::EventSourceStore;
pub use interfaces::ExecutionLogStore;
pub use interfaces::GatewayAlert;
pub use interfaces::GatewayMetrics;
pub use interfaces::IntegrationStore;
pub use interfaces::LogCompletion;
pub use interfaces::LogLevel;
pub use interfaces::LookupResolveError;
pub use interfaces::LookupResolver;
pub use interfaces::LookupStore;
pub use interfaces::MetricEvent;
pub use interfaces::NoScriptEvaluator;
pub use interfaces::NoopAlertSink;
pub use interfaces::NoopMetrics;
pub use interfaces::NoopSystemLog;
pub use interfaces::OutboundRequest;
pub use interfaces::PendingDeliveryStore;
pub use interfaces::RateLimitStore;
pub use interfaces::RequestDispatcher;
pub use interfaces::ScheduledJobStore;
pub use interfaces::ScriptError;
pub use interfaces::ScriptEvaluator;
pub use interfaces::ScriptFailure;
pub use interfaces::SourceBatch;
pub use interfaces::SourceError;
pub use interfaces::StateStore;
pub use interfaces::StoreError;
pub use interfaces::SystemEvent;
pub use interfaces::SystemLogSink;
pub use runtime::Admission;
pub use runtime::MatcherCache;
pub use runtime::MemoryStateStore;
pub use runtime::RateLimiter;
pub use runtime::TransformContext;
pub use runtime::TransformError;
pub use runtime::TransformExecutor;
