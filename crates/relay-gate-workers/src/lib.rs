// crates/relay-gate-workers/src/lib.rs
// ============================================================================
// Module: Relay Gate Workers Library
// Description: Worker runtimes composing the delivery pipeline.
// Purpose: Expose the delivery, scheduler, DLQ, and job workers.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The worker crate composes the core runtime helpers, the delivery stack,
//! and the state store into the four gateway loops: event-driven delivery,
//! DELAYED/RECURRING scheduling, DLQ reprocessing, and CRON/INTERVAL jobs.
//! Each worker is a single logical loop launching bounded-parallel tasks
//! through a shared task-pool primitive; replicas coordinate only through
//! the store's atomic claims.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Alert evaluation.
pub mod alerts;
/// Event-driven delivery worker.
pub mod delivery;
/// DLQ reprocessing worker and manual operations.
pub mod dlq;
/// Scheduled-job worker.
pub mod jobs;
/// Execution-trace writer.
pub mod log_writer;
/// Store-backed lookup resolver.
pub mod lookup;
/// The delivery pipeline shared by the workers.
pub mod pipeline;
/// Bounded task pool.
pub mod pool;
/// DELAYED/RECURRING scheduler worker.
pub mod scheduler;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use alerts::AlertCenter;
pub use delivery::DeliveryWorker;
pub use delivery::DeliveryWorkerSettings;
pub use dlq::DlqOpError;
pub use dlq::DlqWorker;
pub use dlq::DlqWorkerSettings;
pub use dlq::abandon_entries;
pub use dlq::delete_entries;
pub use dlq::retry_entries;
pub use jobs::JobWorkerSettings;
pub use jobs::ScheduledJobWorker;
pub use jobs::build_curl_command;
pub use jobs::next_run_after;
pub use log_writer::ExecutionLogWriter;
pub use log_writer::TraceRecorder;
pub use lookup::StoreLookupResolver;
pub use pipeline::DeliveryPipeline;
pub use pipeline::PipelineDeps;
pub use pipeline::PipelineSettings;
pub use pipeline::RunOutcome;
pub use pool::TaskPool;
pub use scheduler::SchedulerWorker;
pub use scheduler::SchedulerWorkerSettings;
