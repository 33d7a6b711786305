// crates/relay-gate-sources/src/push.rs
// ============================================================================
// Module: HTTP Push Intake
// Description: Authenticated push intake producing normalized events.
// Purpose: Accept per-org event pushes with no backlog.
// Dependencies: relay-gate-core, jsonschema, subtle, tokio
// ============================================================================

//! ## Overview
//! The push intake validates the caller's shared secret in constant time,
//! optionally checks the payload against the org's JSON schema, and hands
//! the resulting event to a bounded queue drained by the delivery worker. A
//! full queue rejects with admission semantics (429); there is no durable
//! backlog for push sources. Invariants:
//! - Secret comparison never short-circuits on content.
//! - A 202 means the event is in the queue; it may still deduplicate
//!   downstream via its fingerprint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use relay_gate_core::Clock;
use relay_gate_core::EntityRid;
use relay_gate_core::HttpPushSourceConfig;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::OrgId;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::SourceType;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::interfaces::SourceBatch;
use relay_gate_core::interfaces::SourceError;
use relay_gate_core::sha256_hex;
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Push intake rejections, mapped to HTTP statuses by the server.
#[derive(Debug, Error)]
pub enum PushError {
    /// Shared secret missing or wrong (401).
    #[error("push secret missing or invalid")]
    Unauthorized,
    /// Payload failed parsing or schema validation (400).
    #[error("push payload invalid: {0}")]
    InvalidPayload(String),
    /// Admission queue is full (429).
    #[error("push admission rejected: queue full")]
    RateLimited,
    /// Intake failure outside the caller's control (500).
    #[error("push intake failure: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Queue
// ============================================================================

/// Creates the bounded push queue pair shared by intake and source.
#[must_use]
pub fn push_queue(capacity: usize) -> (mpsc::Sender<NormalizedEvent>, PushSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (sender, PushSource {
        receiver,
        org_id: None,
    })
}

// ============================================================================
// SECTION: Intake
// ============================================================================

/// Per-org push intake handling one HTTP push call.
pub struct PushIntake {
    /// Owning organization.
    org_id: OrgId,
    /// Push source configuration (secret header, schema).
    config: HttpPushSourceConfig,
    /// Queue feeding the delivery worker.
    queue: mpsc::Sender<NormalizedEvent>,
    /// Clock for `produced_at` stamps.
    clock: Arc<dyn Clock>,
}

impl PushIntake {
    /// Creates an intake for one org.
    #[must_use]
    pub fn new(
        org_id: OrgId,
        config: HttpPushSourceConfig,
        queue: mpsc::Sender<NormalizedEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            org_id,
            config,
            queue,
            clock,
        }
    }

    /// Returns the header name carrying the shared secret.
    #[must_use]
    pub fn secret_header(&self) -> &str {
        &self.config.secret_header
    }

    /// Handles one push call: authenticate, validate, enqueue.
    ///
    /// # Errors
    ///
    /// Returns [`PushError`] describing the rejection; the caller maps it to
    /// 401, 400, 429, or 500.
    pub fn accept(&self, presented_secret: Option<&str>, body: &[u8]) -> Result<(), PushError> {
        let presented = presented_secret.ok_or(PushError::Unauthorized)?;
        let expected = self.config.shared_secret.as_bytes();
        let presented_bytes = presented.as_bytes();
        let matches = presented_bytes.len() == expected.len()
            && bool::from(presented_bytes.ct_eq(expected));
        if !matches {
            return Err(PushError::Unauthorized);
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|err| PushError::InvalidPayload(format!("body is not json: {err}")))?;
        if let Some(schema) = &self.config.payload_schema {
            let validator = jsonschema::validator_for(schema)
                .map_err(|err| PushError::Internal(format!("schema compile failed: {err}")))?;
            if let Err(violation) = validator.validate(&payload) {
                return Err(PushError::InvalidPayload(violation.to_string()));
            }
        }

        let event = self.build_event(payload, body)?;
        self.queue.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::RateLimited,
            mpsc::error::TrySendError::Closed(_) => {
                PushError::Internal("push queue closed".to_string())
            }
        })
    }

    /// Builds the normalized event from an accepted payload.
    fn build_event(&self, payload: Value, raw_body: &[u8]) -> Result<NormalizedEvent, PushError> {
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| PushError::InvalidPayload("event_type is required".to_string()))?
            .to_string();
        let entity_rid = payload.get("entity_rid").and_then(Value::as_str).map(EntityRid::new);
        // Without a caller-supplied id, the body hash identifies the push.
        let source_event_id = payload
            .get("event_id")
            .and_then(Value::as_str)
            .map_or_else(|| sha256_hex(raw_body), ToString::to_string);
        let body = payload.get("payload").cloned().unwrap_or(payload.clone());
        let fingerprint =
            event_fingerprint(self.org_id, SourceType::HttpPush.as_str(), &source_event_id)
                .map_err(|err| PushError::Internal(format!("fingerprint failure: {err}")))?;
        Ok(NormalizedEvent {
            org_id: self.org_id,
            event_type,
            entity_rid,
            payload: body,
            source_event_id,
            produced_at: self.clock.now(),
            fingerprint,
        })
    }
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// Event source draining the push queue; no durable checkpoint exists.
pub struct PushSource {
    /// Queue receiver filled by intakes.
    receiver: mpsc::Receiver<NormalizedEvent>,
    /// Org restriction recorded on start, for registry bookkeeping.
    org_id: Option<OrgId>,
}

impl PushSource {
    /// Binds the source to one org for registry bookkeeping.
    pub fn bind(&mut self, org_id: OrgId) {
        self.org_id = Some(org_id);
    }
}

#[async_trait]
impl EventSource for PushSource {
    fn org_id(&self) -> OrgId {
        self.org_id.unwrap_or_else(|| OrgId::new(0))
    }

    fn source_type(&self) -> SourceType {
        SourceType::HttpPush
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn stop(&mut self) {}

    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError> {
        let mut events = Vec::new();
        while events.len() < 100 {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if events.is_empty() {
                        return Err(SourceError::Fatal("push queue closed".to_string()));
                    }
                    break;
                }
            }
        }
        Ok(SourceBatch {
            events,
            checkpoint: None,
        })
    }

    async fn commit(&mut self, _checkpoint: &SourceCheckpoint) -> Result<(), SourceError> {
        Ok(())
    }
}
