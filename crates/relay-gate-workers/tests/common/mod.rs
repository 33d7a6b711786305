// crates/relay-gate-workers/tests/common/mod.rs
// ============================================================================
// Module: Worker Test Fixtures
// Description: Shared fixtures for pipeline and worker tests.
// Purpose: Provide scripted dispatchers, builders, and collecting sinks.
// Dependencies: relay-gate-workers, relay-gate-core, tokio
// ============================================================================
//! ## Overview
//! Fixtures: a scripted [`MockDispatcher`] that replays queued outcomes and
//! records issued requests, a network-free auth builder, a collecting alert
//! sink, and builders for integrations, events, and pipelines.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    dead_code,
    reason = "Test-only fixtures; not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use relay_gate_config::AlertConfig;
use relay_gate_core::ActionConfig;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryError;
use relay_gate_core::Direction;
use relay_gate_core::ErrorCategory;
use relay_gate_core::HttpMethod;
use relay_gate_core::IntegrationConfig;
use relay_gate_core::IntegrationId;
use relay_gate_core::ManualClock;
use relay_gate_core::MemoryStateStore;
use relay_gate_core::NoScriptEvaluator;
use relay_gate_core::NoopMetrics;
use relay_gate_core::NoopSystemLog;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::OrgId;
use relay_gate_core::OutgoingAuth;
use relay_gate_core::RateLimitPolicy;
use relay_gate_core::Scope;
use relay_gate_core::Timestamp;
use relay_gate_core::Transformation;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::AlertSink;
use relay_gate_core::interfaces::AuthHeaderBuilder;
use relay_gate_core::interfaces::DispatchOutcome;
use relay_gate_core::interfaces::DispatchResponse;
use relay_gate_core::interfaces::GatewayAlert;
use relay_gate_core::interfaces::OutboundRequest;
use relay_gate_core::interfaces::RequestDispatcher;
use relay_gate_core::runtime::TransformExecutor;
use relay_gate_workers::AlertCenter;
use relay_gate_workers::DeliveryPipeline;
use relay_gate_workers::ExecutionLogWriter;
use relay_gate_workers::PipelineDeps;
use relay_gate_workers::PipelineSettings;
use relay_gate_workers::StoreLookupResolver;
use serde_json::json;

/// Scripted dispatcher replaying queued outcomes.
pub struct MockDispatcher {
    /// Outcomes returned in order; empty queue yields 200s.
    outcomes: Mutex<VecDeque<DispatchOutcome>>,
    /// Requests recorded in dispatch order.
    pub requests: Mutex<Vec<OutboundRequest>>,
}

impl MockDispatcher {
    /// Creates a dispatcher with a queue of scripted outcomes.
    pub fn scripted(outcomes: Vec<DispatchOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Returns the recorded requests.
    pub fn recorded(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestDispatcher for MockDispatcher {
    async fn dispatch(&self, request: &OutboundRequest) -> DispatchOutcome {
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| ok_response(200))
    }
}

/// Builds a 2xx outcome with an empty body.
pub fn ok_response(status: u16) -> DispatchOutcome {
    DispatchOutcome::Success(DispatchResponse {
        status,
        headers: BTreeMap::new(),
        body: String::new(),
        duration_ms: 5,
    })
}

/// Builds a failed outcome for an HTTP status.
pub fn status_failure(status: u16, category: ErrorCategory) -> DispatchOutcome {
    DispatchOutcome::Failure {
        error: DeliveryError::with_status(category, "http_status", status, "scripted failure"),
        response: Some(DispatchResponse {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
            duration_ms: 5,
        }),
        retry_after_ms: None,
    }
}

/// Builds an SSRF policy rejection outcome.
pub fn ssrf_rejection() -> DispatchOutcome {
    DispatchOutcome::Failure {
        error: DeliveryError::new(ErrorCategory::Ssrf, "ssrf_policy", "target blocked"),
        response: None,
        retry_after_ms: None,
    }
}

/// Network-free auth builder covering the static auth types.
pub struct TestAuthBuilder;

#[async_trait]
impl AuthHeaderBuilder for TestAuthBuilder {
    async fn build(
        &self,
        _org_id: OrgId,
        _integration_id: &IntegrationId,
        auth: &OutgoingAuth,
    ) -> Result<BTreeMap<String, String>, DeliveryError> {
        let mut headers = BTreeMap::new();
        match auth {
            OutgoingAuth::None => {}
            OutgoingAuth::ApiKey {
                header_name,
                api_key,
            } => {
                headers.insert(header_name.clone(), api_key.clone());
            }
            OutgoingAuth::Bearer {
                token,
            } => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            OutgoingAuth::Basic {
                ..
            }
            | OutgoingAuth::CustomHeaders {
                ..
            } => {}
            OutgoingAuth::Oauth2 {
                ..
            } => {
                return Err(DeliveryError::new(
                    ErrorCategory::Auth,
                    "oauth2_unavailable",
                    "scripted builder has no token endpoint",
                ));
            }
        }
        Ok(headers)
    }
}

/// Alert sink collecting everything it sees.
#[derive(Default)]
pub struct CollectingAlertSink {
    /// Alerts in emission order.
    pub alerts: Mutex<Vec<GatewayAlert>>,
}

impl AlertSink for CollectingAlertSink {
    fn alert(&self, alert: &GatewayAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

/// Everything a pipeline test needs, wired over the in-memory store.
pub struct TestRig {
    pub store: Arc<MemoryStateStore>,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<MockDispatcher>,
    pub alert_sink: Arc<CollectingAlertSink>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub writer: Arc<ExecutionLogWriter>,
}

/// Builds a rig around scripted dispatch outcomes.
pub fn rig(outcomes: Vec<DispatchOutcome>) -> TestRig {
    rig_with_settings(outcomes, fast_settings())
}

/// Pipeline settings with a millisecond retry base for fast tests.
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        dlq_max_retries: 3,
        default_multi_action_delay_ms: 0,
        retry_base_ms: 1,
        env: BTreeMap::new(),
    }
}

/// Builds a rig with explicit pipeline settings.
pub fn rig_with_settings(
    outcomes: Vec<DispatchOutcome>,
    settings: PipelineSettings,
) -> TestRig {
    let store = Arc::new(MemoryStateStore::new());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(
        1_705_276_800_000,
    )));
    let dispatcher = MockDispatcher::scripted(outcomes);
    let alert_sink = Arc::new(CollectingAlertSink::default());
    let writer = Arc::new(ExecutionLogWriter::new(
        Arc::clone(&store) as Arc<dyn relay_gate_core::StateStore>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(NoopSystemLog),
        Vec::new(),
    ));
    let transforms = Arc::new(TransformExecutor::new(
        Arc::new(NoScriptEvaluator),
        Arc::new(StoreLookupResolver::new(Arc::clone(&store) as Arc<dyn relay_gate_core::StateStore>)),
    ));
    let alerts = Arc::new(AlertCenter::new(
        Arc::clone(&alert_sink) as Arc<dyn AlertSink>,
        AlertConfig::default(),
    ));
    let (_cancel_tx, cancel) = tokio::sync::watch::channel(false);
    let pipeline = Arc::new(DeliveryPipeline::new(
        PipelineDeps {
            store: Arc::clone(&store) as Arc<dyn relay_gate_core::StateStore>,
            dispatcher: Arc::clone(&dispatcher) as Arc<dyn RequestDispatcher>,
            auth: Arc::new(TestAuthBuilder),
            transforms,
            writer: Arc::clone(&writer),
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
            metrics: Arc::new(NoopMetrics),
            alerts,
            cancel,
        },
        settings,
    ));
    TestRig {
        store,
        clock,
        dispatcher,
        alert_sink,
        pipeline,
        writer,
    }
}

/// Builds a minimal active default outbound integration.
pub fn integration(org_id: i32, name: &str, event_type: &str) -> IntegrationConfig {
    IntegrationConfig {
        id: IntegrationId::new(format!("int-{name}")),
        org_id: OrgId::new(org_id),
        integration_name: name.to_string(),
        version: None,
        is_default: true,
        direction: Direction::Outbound,
        event_type: event_type.to_string(),
        scope: Scope::AllEntities,
        excluded_entity_rids: BTreeSet::new(),
        actions: vec![action("https://ex.test/a1")],
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

/// Builds a passthrough POST action.
pub fn action(target_url: &str) -> ActionConfig {
    ActionConfig {
        target_url: target_url.to_string(),
        http_method: HttpMethod::Post,
        headers: BTreeMap::new(),
        auth: OutgoingAuth::None,
        transformation: Transformation::passthrough(),
        condition: None,
    }
}

/// Builds a normalized event with a computed fingerprint.
pub fn event(org_id: i32, event_type: &str, source_event_id: &str) -> NormalizedEvent {
    let org = OrgId::new(org_id);
    NormalizedEvent {
        org_id: org,
        event_type: event_type.to_string(),
        entity_rid: None,
        payload: json!({"k": 1}),
        source_event_id: source_event_id.to_string(),
        produced_at: Timestamp::from_unix_millis(1_705_276_800_000),
        fingerprint: event_fingerprint(org, "polling_sql", source_event_id).unwrap(),
    }
}

/// Returns the step names of a trace in order.
pub fn step_names(log: &relay_gate_core::ExecutionLog) -> Vec<String> {
    log.steps.iter().map(|step| step.name.clone()).collect()
}
