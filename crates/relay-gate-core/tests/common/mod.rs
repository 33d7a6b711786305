// crates/relay-gate-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Fixtures
// Description: Shared builders for integration and event fixtures.
// Purpose: Keep individual test files focused on behavior.
// Dependencies: relay-gate-core, serde_json
// ============================================================================
//! ## Overview
//! Builders producing minimal valid fixtures for matcher, pipeline, and
//! signing tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    dead_code,
    reason = "Test-only fixtures; not every test uses every builder."
)]

use relay_gate_core::ActionConfig;
use relay_gate_core::Direction;
use relay_gate_core::HttpMethod;
use relay_gate_core::IntegrationConfig;
use relay_gate_core::IntegrationId;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::OrgId;
use relay_gate_core::OutgoingAuth;
use relay_gate_core::RateLimitPolicy;
use relay_gate_core::Scope;
use relay_gate_core::Timestamp;
use relay_gate_core::Transformation;
use relay_gate_core::event_fingerprint;
use serde_json::json;

/// Builds a minimal action targeting the given URL.
pub fn sample_action(target_url: &str) -> ActionConfig {
    ActionConfig {
        target_url: target_url.to_string(),
        http_method: HttpMethod::Post,
        headers: std::collections::BTreeMap::new(),
        auth: OutgoingAuth::None,
        transformation: Transformation::passthrough(),
        condition: None,
    }
}

/// Builds a minimal active default outbound integration.
pub fn sample_integration(org_id: i32, name: &str, event_type: &str) -> IntegrationConfig {
    IntegrationConfig {
        id: IntegrationId::new(format!("int-{name}")),
        org_id: OrgId::new(org_id),
        integration_name: name.to_string(),
        version: None,
        is_default: true,
        direction: Direction::Outbound,
        event_type: event_type.to_string(),
        scope: Scope::AllEntities,
        excluded_entity_rids: std::collections::BTreeSet::new(),
        actions: vec![sample_action("https://ex.test/hook")],
        timeout_ms: 5_000,
        retry_count: 1,
        multi_action_delay_ms: 0,
        halt_on_error: false,
        rate_limits: RateLimitPolicy::disabled(),
        signing_enabled: false,
        signing_secrets: Vec::new(),
        is_active: true,
        created_at: Timestamp::from_unix_millis(1_000),
        updated_at: Timestamp::from_unix_millis(1_000),
    }
}

/// Builds a normalized event with a computed fingerprint.
pub fn sample_event(org_id: i32, event_type: &str, source_event_id: &str) -> NormalizedEvent {
    let org = OrgId::new(org_id);
    NormalizedEvent {
        org_id: org,
        event_type: event_type.to_string(),
        entity_rid: None,
        payload: json!({"k": 1}),
        source_event_id: source_event_id.to_string(),
        produced_at: Timestamp::from_unix_millis(10_000),
        fingerprint: event_fingerprint(org, "polling_sql", source_event_id).unwrap(),
    }
}
