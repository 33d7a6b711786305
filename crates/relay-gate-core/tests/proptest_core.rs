// crates/relay-gate-core/tests/proptest_core.rs
// ============================================================================
// Module: Core Property Tests
// Description: Property tests over signing, backoff, and window math.
// Purpose: Check invariants across generated inputs.
// Dependencies: relay-gate-core, proptest
// ============================================================================
//! ## Overview
//! Property coverage for the deterministic runtime helpers: signatures
//! round-trip for arbitrary bodies, backoff respects its caps, and window
//! bounds partition the timeline.

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

use proptest::prelude::*;
use relay_gate_core::MessageId;
use relay_gate_core::Timestamp;
use relay_gate_core::runtime::BACKOFF_BASE_MS;
use relay_gate_core::runtime::INLINE_RETRY_CAP_MS;
use relay_gate_core::runtime::exponential_delay_ms;
use relay_gate_core::runtime::generate_secret;
use relay_gate_core::runtime::sign_message;
use relay_gate_core::runtime::signing_headers;
use relay_gate_core::runtime::verify_signature;
use relay_gate_core::runtime::window_bounds;

proptest! {
    #[test]
    fn signing_round_trips_for_any_body(body in ".{0,2048}") {
        let secret = generate_secret();
        let message_id = MessageId::new("msg-prop");
        let headers = signing_headers(
            std::slice::from_ref(&secret),
            &message_id,
            1_700_000_000,
            &body,
        ).unwrap();
        let signature = headers.get("X-Integration-Signature").unwrap();
        verify_signature(
            std::slice::from_ref(&secret),
            &message_id,
            1_700_000_000,
            signature,
            &body,
            1_700_000_100,
        ).unwrap();
    }

    #[test]
    fn signatures_are_replica_independent(body in ".{0,512}", ts in 0_i64..4_000_000_000) {
        let secret = generate_secret();
        let message_id = MessageId::new("msg-prop");
        let first = sign_message(&secret, &message_id, ts, &body).unwrap();
        let second = sign_message(&secret, &message_id, ts, &body).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn exponential_delay_never_exceeds_cap(attempt in 0_u32..128) {
        let delay = exponential_delay_ms(BACKOFF_BASE_MS, attempt, INLINE_RETRY_CAP_MS);
        prop_assert!(delay <= INLINE_RETRY_CAP_MS);
        prop_assert!(delay >= BACKOFF_BASE_MS.min(INLINE_RETRY_CAP_MS));
    }

    #[test]
    fn window_bounds_contain_now(now_ms in 0_i64..4_000_000_000_000, window_s in 1_u32..86_400) {
        let now = Timestamp::from_unix_millis(now_ms);
        let bounds = window_bounds(now, window_s);
        prop_assert!(bounds.start <= now);
        prop_assert!(now < bounds.end);
        let width = bounds.end.as_unix_millis() - bounds.start.as_unix_millis();
        prop_assert_eq!(width, i64::from(window_s) * 1_000);
    }
}
