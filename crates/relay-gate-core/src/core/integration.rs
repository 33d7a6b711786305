// crates/relay-gate-core/src/core/integration.rs
// ============================================================================
// Module: Relay Gate Integration Model
// Description: Integration configurations, actions, and delivery policies.
// Purpose: Model the per-tenant delivery contract as tagged, validated data.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An [`IntegrationConfig`] describes how a matched event is transformed and
//! delivered to one or more external endpoints. Dynamic fields from the
//! control plane (transformation, condition, auth) are modeled as tagged
//! unions rather than free-form maps so invalid variants fail at decode time.
//! Invariants:
//! - `actions` is never empty.
//! - Exactly one default version exists per `(org_id, integration_name)`;
//!   the store's default-swap enforces the exchange atomically.
//! - Numeric policies are clamped to the documented bounds at validation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::EntityRid;
use crate::core::identifiers::IntegrationId;
use crate::core::identifiers::OrgId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Policy Bounds
// ============================================================================

/// Minimum per-request timeout in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Maximum per-request timeout in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 120_000;
/// Maximum inline retry count.
pub const MAX_RETRY_COUNT: u32 = 10;
/// Maximum delay between actions in milliseconds.
pub const MAX_MULTI_ACTION_DELAY_MS: u64 = 600_000;
/// Minimum number of active signing secrets.
pub const MIN_SIGNING_SECRETS: usize = 1;
/// Maximum number of active signing secrets during rotation.
pub const MAX_SIGNING_SECRETS: usize = 3;

// ============================================================================
// SECTION: Trigger Model
// ============================================================================

/// Direction of an integration relative to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Events flow from a tenant source to external endpoints.
    Outbound,
    /// External callers invoke the gateway, which fans out to providers.
    Inbound,
    /// Time-triggered pull-transform-push pipeline.
    Scheduled,
}

/// Entity scoping for outbound integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// The integration applies to every entity of the org.
    AllEntities,
    /// The integration applies only to events carrying an entity id.
    EntityOnly,
}

/// Wildcard event type matching every event within an org.
pub const EVENT_TYPE_WILDCARD: &str = "*";

// ============================================================================
// SECTION: HTTP Method
// ============================================================================

/// HTTP methods supported for outbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpMethod {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
    /// HTTP PUT.
    Put,
    /// HTTP PATCH.
    Patch,
    /// HTTP DELETE.
    Delete,
}

impl HttpMethod {
    /// Returns the method as its wire token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Returns true when the method conventionally carries a body.
    #[must_use]
    pub const fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Transformation
// ============================================================================

/// Formatter applied to a mapped field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formatter {
    /// Uppercase a string value.
    Uppercase,
    /// Lowercase a string value.
    Lowercase,
    /// Trim surrounding whitespace from a string value.
    Trim,
    /// Coerce the value to a JSON number.
    ToNumber,
    /// Coerce the value to a JSON string.
    ToString,
}

/// Lookup-table resolution mode for a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    /// Map a source id to its target id.
    Id,
    /// Map a source id to its target label.
    Name,
    /// Map a target id back to its source id.
    Reverse,
}

/// Lookup-table reference attached to a field mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSpec {
    /// Per-org lookup table name.
    pub table: String,
    /// Resolution mode.
    pub kind: LookupKind,
}

/// One declarative source-to-target assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Dotted path into the source payload (`order.customer.id`).
    pub source: String,
    /// Dotted path in the target body to assign.
    pub target: String,
    /// Optional formatter applied after extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatter: Option<Formatter>,
    /// Optional lookup-table resolution applied after extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupSpec>,
}

/// Payload transformation attached to an action.
///
/// # Invariants
/// - `Simple` mappings are evaluated entirely in-process.
/// - `Script` bodies run only through the injected sandbox evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transformation {
    /// Declarative field map with optional lookups and formatters.
    Simple {
        /// Ordered source-to-target assignments.
        mappings: Vec<FieldMapping>,
    },
    /// Sandboxed `transform(input)` script.
    Script {
        /// Script source handed to the sandbox evaluator.
        script: String,
    },
}

impl Transformation {
    /// Returns an identity transformation passing the payload through.
    #[must_use]
    pub const fn passthrough() -> Self {
        Self::Simple {
            mappings: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Condition
// ============================================================================

/// Comparison operator for declarative conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than (numbers only).
    Gt,
    /// Greater than or equal (numbers only).
    Gte,
    /// Less than (numbers only).
    Lt,
    /// Less than or equal (numbers only).
    Lte,
    /// String or array containment.
    Contains,
    /// Path resolves to a present, non-null value.
    Exists,
}

/// Per-action gating condition; a false result skips the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a payload value addressed by path against a literal.
    Compare {
        /// JSON path (`$.a.b`) or dotted path into the payload.
        path: String,
        /// Comparison operator.
        op: CompareOp,
        /// Literal to compare against; ignored for `exists`.
        #[serde(default)]
        value: Value,
    },
    /// Sandboxed predicate script returning a boolean.
    Script {
        /// Script source handed to the sandbox evaluator.
        script: String,
    },
}

// ============================================================================
// SECTION: Outgoing Auth
// ============================================================================

/// Outgoing authentication configuration for an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingAuth {
    /// No authentication headers.
    None,
    /// Static API key sent in a named header.
    ApiKey {
        /// Header name carrying the key.
        header_name: String,
        /// API key value.
        api_key: String,
    },
    /// HTTP basic authentication.
    Basic {
        /// Basic-auth username.
        username: String,
        /// Basic-auth password.
        password: String,
    },
    /// Static bearer token.
    Bearer {
        /// Bearer token value.
        token: String,
    },
    /// OAuth2 client-credentials grant with cached tokens.
    Oauth2 {
        /// Token endpoint URL.
        token_url: String,
        /// OAuth2 client identifier.
        client_id: String,
        /// OAuth2 client secret.
        client_secret: String,
        /// Optional space-separated scope.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    /// Fixed header map merged into the request.
    CustomHeaders {
        /// Headers merged into the outbound request.
        headers: BTreeMap<String, String>,
    },
}

impl OutgoingAuth {
    /// Returns a stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ApiKey {
                ..
            } => "API_KEY",
            Self::Basic {
                ..
            } => "BASIC",
            Self::Bearer {
                ..
            } => "BEARER",
            Self::Oauth2 {
                ..
            } => "OAUTH2",
            Self::CustomHeaders {
                ..
            } => "CUSTOM_HEADERS",
        }
    }
}

// ============================================================================
// SECTION: Rate Limit Policy
// ============================================================================

/// Per-integration fixed-window admission policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Whether admission control is enforced.
    pub enabled: bool,
    /// Maximum admitted deliveries per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
}

impl RateLimitPolicy {
    /// Returns a disabled policy.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_requests: 0,
            window_seconds: 0,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

// ============================================================================
// SECTION: Action
// ============================================================================

/// One delivery step within an integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Target endpoint URL.
    pub target_url: String,
    /// HTTP method used for the request.
    pub http_method: HttpMethod,
    /// Static headers merged into the request before auth headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Outgoing authentication configuration.
    pub auth: OutgoingAuth,
    /// Payload transformation for this action.
    pub transformation: Transformation,
    /// Optional gating condition; the action is skipped when false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

// ============================================================================
// SECTION: Integration Config
// ============================================================================

/// Description of one outbound, inbound, or scheduled integration.
///
/// # Invariants
/// - `actions` holds at least one action.
/// - `signing_secrets` holds one to three secrets when signing is enabled.
/// - Only one default version exists per `(org_id, integration_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Integration identifier.
    pub id: IntegrationId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Stable name shared across versions.
    pub integration_name: String,
    /// Optional semantic version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether this version is the default for its name.
    pub is_default: bool,
    /// Direction of the integration.
    pub direction: Direction,
    /// Event type to match, or `*` for all.
    pub event_type: String,
    /// Entity scoping rule.
    pub scope: Scope,
    /// Entities excluded under `ENTITY_ONLY` scope.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_entity_rids: BTreeSet<EntityRid>,
    /// Ordered delivery actions.
    pub actions: Vec<ActionConfig>,
    /// Overall per-request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Inline retry count for retryable failures.
    pub retry_count: u32,
    /// Delay between consecutive actions in milliseconds.
    #[serde(default)]
    pub multi_action_delay_ms: u64,
    /// Whether a failed action short-circuits the remaining actions.
    #[serde(default)]
    pub halt_on_error: bool,
    /// Fixed-window admission policy.
    #[serde(default)]
    pub rate_limits: RateLimitPolicy,
    /// Whether outbound requests are HMAC-signed.
    #[serde(default)]
    pub signing_enabled: bool,
    /// Active signing secrets, oldest first during rotation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_secrets: Vec<String>,
    /// Whether the integration participates in matching.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

impl IntegrationConfig {
    /// Validates structural invariants and policy bounds.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationConfigError`] naming the first violated bound.
    pub fn validate(&self) -> Result<(), IntegrationConfigError> {
        if self.integration_name.trim().is_empty() {
            return Err(IntegrationConfigError::EmptyName);
        }
        if self.actions.is_empty() {
            return Err(IntegrationConfigError::NoActions);
        }
        if self.event_type.trim().is_empty() {
            return Err(IntegrationConfigError::EmptyEventType);
        }
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(IntegrationConfigError::TimeoutOutOfRange {
                timeout_ms: self.timeout_ms,
            });
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(IntegrationConfigError::RetryCountOutOfRange {
                retry_count: self.retry_count,
            });
        }
        if self.multi_action_delay_ms > MAX_MULTI_ACTION_DELAY_MS {
            return Err(IntegrationConfigError::ActionDelayOutOfRange {
                delay_ms: self.multi_action_delay_ms,
            });
        }
        if self.rate_limits.enabled
            && (self.rate_limits.max_requests == 0 || self.rate_limits.window_seconds == 0)
        {
            return Err(IntegrationConfigError::RateLimitInvalid);
        }
        if self.signing_enabled
            && !(MIN_SIGNING_SECRETS..=MAX_SIGNING_SECRETS).contains(&self.signing_secrets.len())
        {
            return Err(IntegrationConfigError::SigningSecretsOutOfRange {
                count: self.signing_secrets.len(),
            });
        }
        for action in &self.actions {
            if action.target_url.trim().is_empty() {
                return Err(IntegrationConfigError::EmptyTargetUrl);
            }
        }
        Ok(())
    }

    /// Returns true when this integration's event type matches the given one.
    #[must_use]
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_type == EVENT_TYPE_WILDCARD || self.event_type == event_type
    }
}

/// Integration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrationConfigError {
    /// Integration name is empty.
    #[error("integration name must not be empty")]
    EmptyName,
    /// Action list is empty.
    #[error("integration requires at least one action")]
    NoActions,
    /// Event type is empty.
    #[error("event type must not be empty")]
    EmptyEventType,
    /// Action target URL is empty.
    #[error("action target url must not be empty")]
    EmptyTargetUrl,
    /// Timeout outside the permitted range.
    #[error("timeout_ms {timeout_ms} outside {MIN_TIMEOUT_MS}..={MAX_TIMEOUT_MS}")]
    TimeoutOutOfRange {
        /// Offending timeout value.
        timeout_ms: u64,
    },
    /// Retry count outside the permitted range.
    #[error("retry_count {retry_count} exceeds {MAX_RETRY_COUNT}")]
    RetryCountOutOfRange {
        /// Offending retry count.
        retry_count: u32,
    },
    /// Multi-action delay outside the permitted range.
    #[error("multi_action_delay_ms {delay_ms} exceeds {MAX_MULTI_ACTION_DELAY_MS}")]
    ActionDelayOutOfRange {
        /// Offending delay value.
        delay_ms: u64,
    },
    /// Rate limit enabled with a zero bound.
    #[error("enabled rate limit requires non-zero max_requests and window_seconds")]
    RateLimitInvalid,
    /// Signing secret count outside 1..=3.
    #[error("signing requires {MIN_SIGNING_SECRETS}..={MAX_SIGNING_SECRETS} secrets, got {count}")]
    SigningSecretsOutOfRange {
        /// Offending secret count.
        count: usize,
    },
}
