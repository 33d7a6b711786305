// crates/relay-gate-workers/src/alerts.rs
// ============================================================================
// Module: Alert Center
// Description: Threshold and burst evaluation feeding the alert sink.
// Purpose: Surface DLQ depth, abandonment, and failure bursts to operators.
// Dependencies: relay-gate-core, relay-gate-config
// ============================================================================

//! ## Overview
//! Three conditions raise alerts: the pending DLQ depth crossing its
//! threshold, an entry being abandoned, and a burst of delivery failures
//! inside the detection window. Burst state is per-process; replicas each
//! observe their own share of failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use relay_gate_config::AlertConfig;
use relay_gate_core::DlqEntry;
use relay_gate_core::OrgId;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::AlertKind;
use relay_gate_core::interfaces::AlertSink;
use relay_gate_core::interfaces::GatewayAlert;
use serde_json::json;

// ============================================================================
// SECTION: Burst State
// ============================================================================

/// Rolling failure window state.
#[derive(Debug, Default)]
struct BurstState {
    /// Start of the current window.
    window_start: Timestamp,
    /// Failures observed inside the window.
    count: u32,
    /// Whether the current window already alerted.
    alerted: bool,
}

// ============================================================================
// SECTION: Alert Center
// ============================================================================

/// Evaluates alert conditions and forwards them to the sink.
pub struct AlertCenter {
    /// Operator alert sink.
    sink: Arc<dyn AlertSink>,
    /// Thresholds.
    config: AlertConfig,
    /// Burst detection state.
    burst: Mutex<BurstState>,
    /// Whether the depth threshold already alerted (reset below threshold).
    depth_alerted: Mutex<bool>,
}

impl AlertCenter {
    /// Creates an alert center with the given thresholds.
    #[must_use]
    pub fn new(sink: Arc<dyn AlertSink>, config: AlertConfig) -> Self {
        Self {
            sink,
            config,
            burst: Mutex::new(BurstState::default()),
            depth_alerted: Mutex::new(false),
        }
    }

    /// Samples the pending DLQ depth, alerting on threshold crossings.
    pub fn observe_dlq_depth(&self, depth: u64) {
        let Ok(mut alerted) = self.depth_alerted.lock() else {
            return;
        };
        if depth >= self.config.dlq_depth_threshold {
            if !*alerted {
                *alerted = true;
                self.sink.alert(&GatewayAlert {
                    kind: AlertKind::DlqDepthExceeded,
                    org_id: None,
                    message: format!(
                        "dlq depth {depth} exceeds threshold {}",
                        self.config.dlq_depth_threshold
                    ),
                    metadata: json!({ "depth": depth }),
                });
            }
        } else {
            *alerted = false;
        }
    }

    /// Reports an abandoned DLQ entry.
    pub fn entry_abandoned(&self, entry: &DlqEntry) {
        self.sink.alert(&GatewayAlert {
            kind: AlertKind::DlqAbandoned,
            org_id: Some(entry.org_id),
            message: format!(
                "dlq entry {} abandoned after {} retries",
                entry.dlq_id, entry.retry_count
            ),
            metadata: json!({
                "integration_id": entry.integration_id.as_str(),
                "category": entry.error.category.as_str(),
            }),
        });
    }

    /// Reports a source credential rejection.
    pub fn source_auth_failure(&self, org_id: OrgId, detail: &str) {
        self.sink.alert(&GatewayAlert {
            kind: AlertKind::SourceAuthFailure,
            org_id: Some(org_id),
            message: format!("event source credentials rejected: {detail}"),
            metadata: serde_json::Value::Null,
        });
    }

    /// Records one delivery failure for burst detection.
    pub fn record_failure(&self, org_id: OrgId, now: Timestamp) {
        let Ok(mut burst) = self.burst.lock() else {
            return;
        };
        let window_ms = i64::from(self.config.burst_window_seconds).saturating_mul(1_000);
        if now.millis_since(burst.window_start) > window_ms {
            burst.window_start = now;
            burst.count = 0;
            burst.alerted = false;
        }
        burst.count = burst.count.saturating_add(1);
        if burst.count >= self.config.burst_threshold && !burst.alerted {
            burst.alerted = true;
            self.sink.alert(&GatewayAlert {
                kind: AlertKind::FailureBurst,
                org_id: Some(org_id),
                message: format!(
                    "{} delivery failures within {}s",
                    burst.count, self.config.burst_window_seconds
                ),
                metadata: json!({ "count": burst.count }),
            });
        }
    }
}
