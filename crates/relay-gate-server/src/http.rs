// crates/relay-gate-server/src/http.rs
// ============================================================================
// Module: HTTP Surface
// Description: Axum routes for health and per-org event push.
// Purpose: Serve liveness and the authenticated push intake.
// Dependencies: relay-gate-core, relay-gate-sources, axum
// ============================================================================

//! ## Overview
//! Two routes exist: `GET /health` reporting store reachability and worker
//! liveness (200/503), and `POST /push/{org_id}` accepting pushed events
//! against the org's shared secret. Push responses follow the intake
//! contract: 202 accepted, 400 invalid payload, 401 bad secret, 404 no
//! push source, 429 admission rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use relay_gate_core::OrgId;
use relay_gate_core::interfaces::StateStore;
use relay_gate_sources::PushError;
use relay_gate_sources::PushIntake;
use serde_json::json;

use crate::health::HealthRegistry;

// ============================================================================
// SECTION: Push Registry
// ============================================================================

/// Per-org push intakes, rebuilt on adapter reload.
#[derive(Default)]
pub struct PushRegistry {
    /// Intakes keyed by org.
    intakes: RwLock<BTreeMap<OrgId, Arc<PushIntake>>>,
}

impl PushRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the registered intakes.
    pub fn replace(&self, intakes: BTreeMap<OrgId, Arc<PushIntake>>) {
        if let Ok(mut guard) = self.intakes.write() {
            *guard = intakes;
        }
    }

    /// Returns the intake for an org, when one is registered.
    #[must_use]
    pub fn intake(&self, org_id: OrgId) -> Option<Arc<PushIntake>> {
        self.intakes.read().ok().and_then(|guard| guard.get(&org_id).cloned())
    }
}

// ============================================================================
// SECTION: App State
// ============================================================================

/// Shared route state.
#[derive(Clone)]
pub struct AppState {
    /// Worker liveness registry.
    pub health: Arc<HealthRegistry>,
    /// State store probed by the health endpoint.
    pub store: Arc<dyn StateStore>,
    /// Push intakes.
    pub push: Arc<PushRegistry>,
}

/// Builds the gateway router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/push/{org_id}", post(push_handler))
        .with_state(state)
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Reports store reachability and worker liveness.
async fn health_handler(State(state): State<AppState>) -> Response {
    let store_ok = state.store.pending_dlq_count(None).is_ok();
    let report = state.health.report(store_ok);
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(report)).into_response()
}

/// Accepts one pushed event for an org.
async fn push_handler(
    State(state): State<AppState>,
    Path(org_id): Path<i32>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(intake) = state.push.intake(OrgId::new(org_id)) else {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": "no push source for org" })),
        )
            .into_response();
    };
    let presented = headers
        .get(intake.secret_header())
        .and_then(|value| value.to_str().ok());
    match intake.accept(presented, &body) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            axum::Json(json!({ "status": "accepted" })),
        )
            .into_response(),
        Err(err) => {
            let status = match &err {
                PushError::Unauthorized => StatusCode::UNAUTHORIZED,
                PushError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                PushError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                PushError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}
