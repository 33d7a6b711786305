// crates/relay-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Relay Gate Runtime
// Description: Pure runtime helpers shared by gateway workers.
// Purpose: Group matching, admission, transformation, signing, and backoff.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime helpers are deterministic and I/O-free apart from the store
//! traits they are handed. Workers compose them into the delivery pipeline;
//! the pieces stay separately testable.

/// Backoff schedules.
pub mod backoff;
/// Event-to-integration matching.
pub mod matcher;
/// Fixed-window admission control.
pub mod ratelimit;
/// Request signing and verification.
pub mod signing;
/// In-memory state store.
pub mod store;
/// Transform execution.
pub mod transform;

pub use backoff::BACKOFF_BASE_MS;
pub use backoff::DLQ_RETRY_CAP_MS;
pub use backoff::INLINE_RETRY_CAP_MS;
pub use backoff::dlq_retry_delay_ms;
pub use backoff::exponential_delay_ms;
pub use backoff::inline_retry_delay_ms;
pub use backoff::with_jitter;
pub use matcher::MatcherCache;
pub use matcher::integration_matches;
pub use matcher::match_event;
pub use ratelimit::Admission;
pub use ratelimit::RateLimiter;
pub use ratelimit::WindowBounds;
pub use ratelimit::window_bounds;
pub use signing::FRESHNESS_WINDOW_SECONDS;
pub use signing::MESSAGE_ID_HEADER;
pub use signing::SECRET_PREFIX;
pub use signing::SIGNATURE_HEADER;
pub use signing::SIGNATURE_VERSION;
pub use signing::SigningError;
pub use signing::TIMESTAMP_HEADER;
pub use signing::decode_secret;
pub use signing::generate_secret;
pub use signing::sign_message;
pub use signing::signing_headers;
pub use signing::verify_signature;
pub use store::MemoryStateStore;
pub use transform::TransformContext;
pub use transform::TransformError;
pub use transform::TransformExecutor;
pub use transform::resolve_path;
pub use transform::substitute_variables;
