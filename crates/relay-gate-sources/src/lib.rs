// crates/relay-gate-sources/src/lib.rs
// ============================================================================
// Module: Relay Gate Sources Library
// Description: Per-tenant event source adapters.
// Purpose: Expose the polling-SQL, stream, and HTTP-push adapters.
// Dependencies: crate::{polling_sql, push, stream}
// ============================================================================

//! ## Overview
//! Source adapters turn tenant-configured external systems into streams of
//! normalized events with at-least-once semantics: a batch's checkpoint is
//! committed only after the delivery worker has enqueued the whole batch.
//! Restarting an adapter resumes from the stored checkpoint.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Polling-SQL adapter.
pub mod polling_sql;
/// HTTP-push intake.
pub mod push;
/// Stream adapter and broker seam.
pub mod stream;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use polling_sql::PollingSqlSource;
pub use push::PushError;
pub use push::PushIntake;
pub use push::PushSource;
pub use push::push_queue;
pub use stream::BrokerConsumer;
pub use stream::BrokerRecord;
pub use stream::ChannelConsumer;
pub use stream::ChannelConsumerHandle;
pub use stream::StreamSource;
pub use stream::consumer_group;
