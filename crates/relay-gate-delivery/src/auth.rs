// crates/relay-gate-delivery/src/auth.rs
// ============================================================================
// Module: Outgoing Auth Builder
// Description: Header construction for every supported auth type.
// Purpose: Build credentials with cached, single-flight OAuth2 tokens.
// Dependencies: relay-gate-core, base64, reqwest, tokio
// ============================================================================

//! ## Overview
//! Static auth types (API key, basic, bearer, custom headers) are pure
//! header construction. OAuth2 client-credentials tokens are fetched from
//! the configured token endpoint and cached per integration until 30
//! seconds before expiry; refreshes are single-flight per integration so a
//! burst of deliveries cannot stampede a tenant's identity provider. Every
//! failure here carries category `AUTH`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryError;
use relay_gate_core::ErrorCategory;
use relay_gate_core::IntegrationId;
use relay_gate_core::OrgId;
use relay_gate_core::OutgoingAuth;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::AuthHeaderBuilder;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Safety margin subtracted from `expires_in` before a token is refreshed.
const TOKEN_EXPIRY_MARGIN_SECONDS: i64 = 30;
/// Timeout for token endpoint calls.
const TOKEN_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Token Cache
// ============================================================================

/// One cached OAuth2 access token.
#[derive(Debug, Clone)]
struct CachedToken {
    /// Bearer token value.
    access_token: String,
    /// Time after which the token must be refreshed.
    refresh_after: Timestamp,
}

/// Token endpoint response shape (client credentials grant).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    /// Access token value.
    access_token: String,
    /// Token lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Outgoing-auth header builder with an OAuth2 token cache.
pub struct AuthBuilder {
    /// HTTP client for token endpoint calls.
    http: reqwest::Client,
    /// Cached tokens keyed by integration id.
    tokens: RwLock<BTreeMap<String, CachedToken>>,
    /// Per-integration refresh locks for single-flight fetches.
    flights: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
    /// Clock for expiry checks.
    clock: Arc<dyn Clock>,
}

impl AuthBuilder {
    /// Creates a builder with a dedicated token-fetch client.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] with category `INTERNAL` when the HTTP
    /// client cannot be constructed.
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| {
                DeliveryError::new(
                    ErrorCategory::Internal,
                    "auth_client_build",
                    format!("token client build failed: {err}"),
                )
            })?;
        Ok(Self {
            http,
            tokens: RwLock::new(BTreeMap::new()),
            flights: Mutex::new(BTreeMap::new()),
            clock,
        })
    }

    /// Returns a cached token when it is still fresh.
    async fn cached_token(&self, integration_id: &IntegrationId) -> Option<String> {
        let tokens = self.tokens.read().await;
        tokens.get(integration_id.as_str()).and_then(|token| {
            (self.clock.now() < token.refresh_after).then(|| token.access_token.clone())
        })
    }

    /// Fetches (or waits for) a token with single-flight per integration.
    async fn oauth2_token(
        &self,
        integration_id: &IntegrationId,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<String, DeliveryError> {
        if let Some(token) = self.cached_token(integration_id).await {
            return Ok(token);
        }
        let flight = {
            let mut flights = self.flights.lock().await;
            Arc::clone(
                flights
                    .entry(integration_id.as_str().to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = flight.lock().await;
        // A concurrent flight may have refreshed the token while we waited.
        if let Some(token) = self.cached_token(integration_id).await {
            return Ok(token);
        }

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }
        let response = self
            .http
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| auth_error(format!("token endpoint unreachable: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::with_status(
                ErrorCategory::Auth,
                "token_endpoint_status",
                status.as_u16(),
                "token endpoint rejected the client credentials",
            ));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| auth_error(format!("token response parse failed: {err}")))?;
        let lifetime = token.expires_in.unwrap_or(TOKEN_EXPIRY_MARGIN_SECONDS * 2);
        let refresh_after = self
            .clock
            .now()
            .saturating_add_millis((lifetime - TOKEN_EXPIRY_MARGIN_SECONDS).max(0) * 1_000);
        let mut tokens = self.tokens.write().await;
        tokens.insert(integration_id.as_str().to_string(), CachedToken {
            access_token: token.access_token.clone(),
            refresh_after,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl AuthHeaderBuilder for AuthBuilder {
    async fn build(
        &self,
        _org_id: OrgId,
        integration_id: &IntegrationId,
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
            OutgoingAuth::Basic {
                username,
                password,
            } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                headers.insert("Authorization".to_string(), format!("Basic {encoded}"));
            }
            OutgoingAuth::Bearer {
                token,
            } => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            OutgoingAuth::Oauth2 {
                token_url,
                client_id,
                client_secret,
                scope,
            } => {
                let token = self
                    .oauth2_token(
                        integration_id,
                        token_url,
                        client_id,
                        client_secret,
                        scope.as_deref(),
                    )
                    .await?;
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            OutgoingAuth::CustomHeaders {
                headers: fixed,
            } => {
                for (name, value) in fixed {
                    headers.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(headers)
    }
}

/// Builds an `AUTH`-category error.
fn auth_error(message: String) -> DeliveryError {
    DeliveryError::new(ErrorCategory::Auth, "auth_build", message)
}
