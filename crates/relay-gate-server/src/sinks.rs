// crates/relay-gate-server/src/sinks.rs
// ============================================================================
// Module: Observability Sinks
// Description: JSON-line stderr sinks for system events and alerts.
// Purpose: Give deployments a default sink without external dependencies.
// Dependencies: relay-gate-core, serde_json
// ============================================================================

//! ## Overview
//! Default sinks writing one JSON object per line to stderr. Deployments
//! plug their own [`SystemLogSink`] and [`AlertSink`] implementations into
//! the supervisor to ship events elsewhere; nothing in the workers depends
//! on these concrete types.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;

use relay_gate_core::interfaces::AlertSink;
use relay_gate_core::interfaces::GatewayAlert;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use serde_json::json;

// ============================================================================
// SECTION: System Log
// ============================================================================

/// Writes system events as JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSystemLog;

impl SystemLogSink for StderrSystemLog {
    fn log(&self, event: &SystemEvent) {
        let line = json!({
            "kind": "system_event",
            "level": event.level,
            "component": event.component,
            "message": event.message,
            "org_id": event.org_id,
            "metadata": event.metadata,
        });
        write_line(&line);
    }
}

// ============================================================================
// SECTION: Alert Sink
// ============================================================================

/// Writes alerts as JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAlertSink;

impl AlertSink for StderrAlertSink {
    fn alert(&self, alert: &GatewayAlert) {
        let line = json!({
            "kind": "alert",
            "alert": alert,
        });
        write_line(&line);
    }
}

/// Writes one JSON value as a line to stderr, ignoring write failures.
#[allow(
    clippy::print_stderr,
    reason = "Stderr is the designated transport for the default sinks."
)]
fn write_line(line: &serde_json::Value) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{line}");
}
