// crates/relay-gate-core/src/runtime/ratelimit.rs
// ============================================================================
// Module: Relay Gate Rate Limiter
// Description: Fixed-window admission control over atomic store counters.
// Purpose: Bound per-integration delivery rates across worker replicas.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! Admission uses a fixed window keyed by `(integration_id, floor(now /
//! window_seconds))`. The shared counter lives in the state store and is the
//! only cross-worker mutable hot spot; every update is an atomic increment.
//! A rejected delivery is not retried inline; the caller routes it to the
//! DLQ with `next_retry_at = window_end`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::IntegrationId;
use crate::core::RateLimitPolicy;
use crate::core::Timestamp;
use crate::interfaces::RateLimitStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Window Math
// ============================================================================

/// Inclusive start and exclusive end of the fixed window containing `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    /// Window start (inclusive).
    pub start: Timestamp,
    /// Window end (exclusive).
    pub end: Timestamp,
}

/// Computes the window bounds for a policy at a given instant.
#[must_use]
pub fn window_bounds(now: Timestamp, window_seconds: u32) -> WindowBounds {
    let window_ms = i64::from(window_seconds).saturating_mul(1_000).max(1);
    let start = now.as_unix_millis().div_euclid(window_ms).saturating_mul(window_ms);
    WindowBounds {
        start: Timestamp::from_unix_millis(start),
        end: Timestamp::from_unix_millis(start.saturating_add(window_ms)),
    }
}

// ============================================================================
// SECTION: Admission
// ============================================================================

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Delivery admitted; `remaining` requests stay in the window.
    Admitted {
        /// Remaining capacity in the current window.
        remaining: u32,
    },
    /// Delivery rejected until the window rolls over.
    Rejected {
        /// Time the current window ends; retry no earlier than this.
        retry_at: Timestamp,
    },
}

impl Admission {
    /// Returns true when the delivery was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Fixed-window rate limiter over the shared counter store.
pub struct RateLimiter<'a> {
    /// Counter persistence shared across replicas.
    store: &'a dyn RateLimitStore,
}

impl<'a> RateLimiter<'a> {
    /// Creates a limiter over the given counter store.
    #[must_use]
    pub const fn new(store: &'a dyn RateLimitStore) -> Self {
        Self {
            store,
        }
    }

    /// Runs one admission check for an integration at `now`.
    ///
    /// A disabled policy admits unconditionally and writes no counter
    /// document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the counter increment fails.
    pub fn check(
        &self,
        integration_id: &IntegrationId,
        policy: &RateLimitPolicy,
        now: Timestamp,
    ) -> Result<Admission, StoreError> {
        if !policy.enabled {
            return Ok(Admission::Admitted {
                remaining: u32::MAX,
            });
        }
        let bounds = window_bounds(now, policy.window_seconds);
        let count = self.store.increment_window(integration_id, bounds.start, bounds.end)?;
        if count <= policy.max_requests {
            Ok(Admission::Admitted {
                remaining: policy.max_requests.saturating_sub(count),
            })
        } else {
            Ok(Admission::Rejected {
                retry_at: bounds.end,
            })
        }
    }
}
