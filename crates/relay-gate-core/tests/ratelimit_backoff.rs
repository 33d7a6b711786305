// crates/relay-gate-core/tests/ratelimit_backoff.rs
// ============================================================================
// Module: Rate Limit and Backoff Tests
// Description: Tests for window admission and retry schedules.
// Purpose: Exercise fixed-window soundness and backoff bounds.
// Dependencies: relay-gate-core, rand
// ============================================================================
//! ## Overview
//! Validates window math, admission counting across a shared store, and the
//! jittered backoff schedules.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use rand::SeedableRng;
use rand::rngs::StdRng;
use relay_gate_core::Admission;
use relay_gate_core::IntegrationId;
use relay_gate_core::MemoryStateStore;
use relay_gate_core::RateLimitPolicy;
use relay_gate_core::RateLimiter;
use relay_gate_core::Timestamp;
use relay_gate_core::runtime::BACKOFF_BASE_MS;
use relay_gate_core::runtime::DLQ_RETRY_CAP_MS;
use relay_gate_core::runtime::INLINE_RETRY_CAP_MS;
use relay_gate_core::runtime::dlq_retry_delay_ms;
use relay_gate_core::runtime::exponential_delay_ms;
use relay_gate_core::runtime::inline_retry_delay_ms;
use relay_gate_core::runtime::window_bounds;

fn policy(max_requests: u32, window_seconds: u32) -> RateLimitPolicy {
    RateLimitPolicy {
        enabled: true,
        max_requests,
        window_seconds,
    }
}

#[test]
fn window_bounds_are_aligned_and_exclusive() {
    let bounds = window_bounds(Timestamp::from_unix_millis(125_500), 60);
    assert_eq!(bounds.start.as_unix_millis(), 120_000);
    assert_eq!(bounds.end.as_unix_millis(), 180_000);

    // Instants inside the same window share bounds.
    let same = window_bounds(Timestamp::from_unix_millis(179_999), 60);
    assert_eq!(same.start, bounds.start);

    // The window end belongs to the next window.
    let next = window_bounds(Timestamp::from_unix_millis(180_000), 60);
    assert_eq!(next.start.as_unix_millis(), 180_000);
}

#[test]
fn admission_stops_at_max_requests() {
    let store = MemoryStateStore::new();
    let limiter = RateLimiter::new(&store);
    let integration = IntegrationId::new("int-c");
    let now = Timestamp::from_unix_millis(1_000);
    let policy = policy(3, 120);

    for n in 0..3 {
        let admission = limiter.check(&integration, &policy, now).unwrap();
        assert!(admission.is_admitted(), "request {n} should be admitted");
    }
    for n in 3..6 {
        let admission = limiter.check(&integration, &policy, now).unwrap();
        match admission {
            Admission::Rejected {
                retry_at,
            } => assert_eq!(retry_at.as_unix_millis(), 120_000),
            Admission::Admitted {
                ..
            } => panic!("request {n} should be rejected"),
        }
    }
}

#[test]
fn disabled_policy_admits_without_counter_documents() {
    let store = MemoryStateStore::new();
    let limiter = RateLimiter::new(&store);
    let integration = IntegrationId::new("int-c");
    let now = Timestamp::from_unix_millis(1_000);

    let admission =
        limiter.check(&integration, &RateLimitPolicy::disabled(), now).unwrap();
    assert!(admission.is_admitted());

    // No window document was written: a fresh enabled check starts at 1.
    let admission = limiter.check(&integration, &policy(1, 60), now).unwrap();
    assert!(admission.is_admitted());
}

#[test]
fn windows_are_independent_per_integration() {
    let store = MemoryStateStore::new();
    let limiter = RateLimiter::new(&store);
    let now = Timestamp::from_unix_millis(1_000);
    let policy = policy(1, 60);

    assert!(limiter.check(&IntegrationId::new("a"), &policy, now).unwrap().is_admitted());
    assert!(limiter.check(&IntegrationId::new("b"), &policy, now).unwrap().is_admitted());
    assert!(!limiter.check(&IntegrationId::new("a"), &policy, now).unwrap().is_admitted());
}

#[test]
fn exponential_delay_doubles_to_cap() {
    assert_eq!(exponential_delay_ms(BACKOFF_BASE_MS, 0, INLINE_RETRY_CAP_MS), 1_000);
    assert_eq!(exponential_delay_ms(BACKOFF_BASE_MS, 1, INLINE_RETRY_CAP_MS), 2_000);
    assert_eq!(exponential_delay_ms(BACKOFF_BASE_MS, 4, INLINE_RETRY_CAP_MS), 16_000);
    assert_eq!(exponential_delay_ms(BACKOFF_BASE_MS, 10, INLINE_RETRY_CAP_MS), 30_000);
    assert_eq!(exponential_delay_ms(BACKOFF_BASE_MS, 63, DLQ_RETRY_CAP_MS), 300_000);
}

#[test]
fn inline_retry_delays_stay_in_jitter_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    for attempt in 0..6_u32 {
        let raw = exponential_delay_ms(BACKOFF_BASE_MS, attempt, INLINE_RETRY_CAP_MS);
        for _ in 0..50 {
            let delay = inline_retry_delay_ms(attempt, &mut rng);
            let low = (raw as f64 * 0.8).floor() as u64;
            let high = (raw as f64 * 1.2).ceil() as u64;
            assert!(delay >= low && delay <= high, "attempt {attempt}: {delay} not in [{low}, {high}]");
        }
    }
}

#[test]
fn dlq_retry_delays_stay_in_jitter_bounds() {
    let mut rng = StdRng::seed_from_u64(11);
    for retry_count in 0..10_u32 {
        let raw = exponential_delay_ms(BACKOFF_BASE_MS, retry_count, DLQ_RETRY_CAP_MS);
        for _ in 0..50 {
            let delay = dlq_retry_delay_ms(retry_count, &mut rng);
            let low = (raw as f64 * 0.8).floor() as u64;
            let high = (raw as f64 * 1.2).ceil() as u64;
            assert!(delay >= low && delay <= high);
        }
    }
}
