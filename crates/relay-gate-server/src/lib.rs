// crates/relay-gate-server/src/lib.rs
// ============================================================================
// Module: Relay Gate Server Library
// Description: Supervisor, health surface, and inbound push routes.
// Purpose: Wire the store, adapters, and workers into one process.
// Dependencies: crate::{health, http, sinks, supervisor}
// ============================================================================

//! ## Overview
//! The server crate owns process lifecycle: it connects the state store,
//! builds per-org source adapters, spawns the workers with restart backoff,
//! serves `/health` and the per-org push endpoint, and drains in-flight
//! work on shutdown within a bounded deadline.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Worker liveness registry.
pub mod health;
/// Axum routes.
pub mod http;
/// Stderr observability sinks.
pub mod sinks;
/// Process supervisor.
pub mod supervisor;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use health::HealthRegistry;
pub use health::HealthReport;
pub use health::WorkerHealth;
pub use http::PushRegistry;
pub use http::build_router;
pub use sinks::StderrAlertSink;
pub use sinks::StderrSystemLog;
pub use supervisor::Supervisor;
pub use supervisor::SupervisorError;
