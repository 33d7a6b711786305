// crates/relay-gate-server/tests/health_registry.rs
// ============================================================================
// Module: Health Registry Tests
// Description: Tests for worker liveness reporting.
// Purpose: Exercise the interval * 3 staleness rule and report shape.
// Dependencies: relay-gate-server, relay-gate-core
// ============================================================================
//! ## Overview
//! Validates that workers count as live while their heartbeat is younger
//! than three tick intervals, and that store reachability gates the overall
//! verdict.

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

use std::sync::Arc;

use relay_gate_core::Clock;
use relay_gate_core::ManualClock;
use relay_gate_core::Timestamp;
use relay_gate_server::HealthRegistry;

fn registry() -> (Arc<ManualClock>, HealthRegistry) {
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(10_000)));
    let registry = HealthRegistry::new(Arc::clone(&clock) as Arc<dyn Clock>);
    (clock, registry)
}

#[test]
fn fresh_workers_report_healthy() {
    let (_clock, mut registry) = registry();
    let heartbeat = registry.register("delivery", 1_000);
    let _ = heartbeat;
    let report = registry.report(true);
    assert!(report.healthy);
    assert!(report.state_store);
    assert_eq!(report.workers.len(), 1);
    assert!(report.workers[0].healthy);
}

#[test]
fn workers_go_stale_after_three_intervals() {
    let (clock, mut registry) = registry();
    let heartbeat = registry.register("delivery", 1_000);

    clock.advance_millis(3_000);
    assert!(registry.report(true).healthy, "exactly 3 intervals is still live");

    clock.advance_millis(1);
    let report = registry.report(true);
    assert!(!report.healthy);
    assert!(!report.workers[0].healthy);

    // A new heartbeat restores liveness.
    heartbeat.send(clock.now()).unwrap();
    assert!(registry.report(true).healthy);
}

#[test]
fn unreachable_store_fails_health_even_with_live_workers() {
    let (_clock, mut registry) = registry();
    let _heartbeat = registry.register("delivery", 1_000);
    let report = registry.report(false);
    assert!(!report.healthy);
    assert!(!report.state_store);
    assert!(report.workers[0].healthy);
}

#[test]
fn each_worker_is_tracked_independently() {
    let (clock, mut registry) = registry();
    let fast = registry.register("delivery", 1_000);
    let _slow = registry.register("scheduler", 60_000);

    clock.advance_millis(10_000);
    let report = registry.report(true);
    let by_name = |name: &str| {
        report.workers.iter().find(|worker| worker.name == name).cloned().unwrap()
    };
    assert!(!by_name("delivery").healthy);
    assert!(by_name("scheduler").healthy);
    assert!(!report.healthy);

    fast.send(clock.now()).unwrap();
    assert!(registry.report(true).healthy);
}
