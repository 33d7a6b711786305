// crates/relay-gate-core/src/runtime/backoff.rs
// ============================================================================
// Module: Relay Gate Backoff
// Description: Exponential backoff schedules with bounded jitter.
// Purpose: Space inline retries and DLQ reprocessing attempts.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Two schedules exist: inline retries inside one delivery attempt (base
//! 1 s, cap 30 s) and DLQ reprocessing (base 1 s, cap 5 min). Both follow
//! `min(base * 2^n, cap)` with a multiplicative jitter in `[0.8, 1.2]` so
//! replicas never synchronize their retries. The jitterless helpers exist
//! for property tests over the raw schedule.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::Rng;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Base delay for both schedules in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 1_000;
/// Inline retry delay cap in milliseconds.
pub const INLINE_RETRY_CAP_MS: u64 = 30_000;
/// DLQ reprocessing delay cap in milliseconds.
pub const DLQ_RETRY_CAP_MS: u64 = 300_000;
/// Lower jitter bound.
pub const JITTER_LOW: f64 = 0.8;
/// Upper jitter bound.
pub const JITTER_HIGH: f64 = 1.2;

// ============================================================================
// SECTION: Schedules
// ============================================================================

/// Raw exponential delay `min(base * 2^attempt, cap)` without jitter.
#[must_use]
pub fn exponential_delay_ms(base_ms: u64, attempt: u32, cap_ms: u64) -> u64 {
    let shifted = base_ms.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
    shifted.min(cap_ms)
}

/// Applies multiplicative jitter in `[JITTER_LOW, JITTER_HIGH]` to a delay.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Jittered delays are bounded well below the f64 integer limit."
)]
pub fn with_jitter(delay_ms: u64, rng: &mut impl Rng) -> u64 {
    let factor = rng.gen_range(JITTER_LOW..=JITTER_HIGH);
    let jittered = (delay_ms as f64 * factor).round();
    if jittered >= u64::MAX as f64 {
        u64::MAX
    } else if jittered <= 0.0 {
        0
    } else {
        jittered as u64
    }
}

/// Jittered inline retry delay for attempt `n` (zero-based).
#[must_use]
pub fn inline_retry_delay_ms(attempt: u32, rng: &mut impl Rng) -> u64 {
    with_jitter(exponential_delay_ms(BACKOFF_BASE_MS, attempt, INLINE_RETRY_CAP_MS), rng)
}

/// Jittered DLQ reprocessing delay for a completed retry count.
#[must_use]
pub fn dlq_retry_delay_ms(retry_count: u32, rng: &mut impl Rng) -> u64 {
    with_jitter(exponential_delay_ms(BACKOFF_BASE_MS, retry_count, DLQ_RETRY_CAP_MS), rng)
}
