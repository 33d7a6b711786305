// crates/relay-gate-server/src/health.rs
// ============================================================================
// Module: Health Registry
// Description: Worker liveness tracking for the health endpoint.
// Purpose: Report per-worker heartbeats against their tick intervals.
// Dependencies: relay-gate-core, serde, tokio
// ============================================================================

//! ## Overview
//! Every worker publishes its last completed tick through a watch channel.
//! The registry considers a worker live while its heartbeat is younger than
//! three tick intervals; the health endpoint reports 200 only when the
//! state store is reachable and every enabled worker is live.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use relay_gate_core::Clock;
use relay_gate_core::Timestamp;
use serde::Serialize;
use tokio::sync::watch;

// ============================================================================
// SECTION: Worker Health
// ============================================================================

/// One registered worker heartbeat.
pub struct WorkerHealth {
    /// Worker label.
    pub name: &'static str,
    /// Tick interval the worker promised.
    pub interval_ms: u64,
    /// Heartbeat receiver updated after each tick.
    pub heartbeat: watch::Receiver<Timestamp>,
}

/// Per-worker liveness in a health report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker label.
    pub name: String,
    /// Whether the worker ticked within `interval * 3`.
    pub healthy: bool,
    /// Last completed tick, unix milliseconds.
    pub last_tick: i64,
}

/// Full health report body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    /// Overall health.
    pub healthy: bool,
    /// Whether the state store answered the probe.
    pub state_store: bool,
    /// Per-worker liveness.
    pub workers: Vec<WorkerReport>,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of enabled worker heartbeats.
pub struct HealthRegistry {
    /// Registered workers.
    workers: Vec<WorkerHealth>,
    /// Clock for staleness checks.
    clock: Arc<dyn Clock>,
}

impl HealthRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            workers: Vec::new(),
            clock,
        }
    }

    /// Registers a worker heartbeat; returns the sender the worker uses.
    pub fn register(
        &mut self,
        name: &'static str,
        interval_ms: u64,
    ) -> watch::Sender<Timestamp> {
        let (sender, heartbeat) = watch::channel(self.clock.now());
        self.workers.push(WorkerHealth {
            name,
            interval_ms,
            heartbeat,
        });
        sender
    }

    /// Builds a report against the current clock.
    #[must_use]
    pub fn report(&self, state_store_ok: bool) -> HealthReport {
        let now = self.clock.now();
        let workers: Vec<WorkerReport> = self
            .workers
            .iter()
            .map(|worker| {
                let last_tick = *worker.heartbeat.borrow();
                let stale_after = i64::try_from(worker.interval_ms.saturating_mul(3))
                    .unwrap_or(i64::MAX);
                WorkerReport {
                    name: worker.name.to_string(),
                    healthy: now.millis_since(last_tick) <= stale_after,
                    last_tick: last_tick.as_unix_millis(),
                }
            })
            .collect();
        HealthReport {
            healthy: state_store_ok && workers.iter().all(|worker| worker.healthy),
            state_store: state_store_ok,
            workers,
        }
    }
}
