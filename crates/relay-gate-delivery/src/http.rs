// crates/relay-gate-delivery/src/http.rs
// ============================================================================
// Module: HTTP Deliverer
// Description: SSRF-guarded outbound HTTP with outcome classification.
// Purpose: Issue delivery requests and classify every result by category.
// Dependencies: relay-gate-core, reqwest, tokio, url
// ============================================================================

//! ## Overview
//! Before any connection, the target URL passes the SSRF policy: scheme
//! restrictions, no embedded credentials, hostname `localhost` rejected,
//! and every resolved peer address checked against private, loopback,
//! link-local, unique-local, unspecified, multicast, and broadcast ranges.
//! DNS results are pinned into the client so the checked address is the
//! connected address. The configured timeout is the overall deadline.
//! Outcomes map to categories per the delivery table: 2xx success, 3xx and
//! 5xx `SERVER_ERROR`, 401/403 `AUTH`, 408 `TIMEOUT`, 429 `RATE_LIMIT`
//! (honoring `Retry-After`), other 4xx `VALIDATION`, transport errors
//! `NETWORK` or `TIMEOUT`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use relay_gate_core::DeliveryError;
use relay_gate_core::ErrorCategory;
use relay_gate_core::HttpMethod;
use relay_gate_core::interfaces::DispatchOutcome;
use relay_gate_core::interfaces::DispatchResponse;
use relay_gate_core::interfaces::OutboundRequest;
use relay_gate_core::interfaces::RequestDispatcher;
use relay_gate_core::truncate_body;
use reqwest::redirect::Policy;
use url::Url;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Deliverer policy configuration.
///
/// # Invariants
/// - `enforce_https = true` blocks cleartext `http://` targets.
/// - `block_private_networks = true` blocks private/link-local/loopback
///   peers and hostname `localhost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelivererConfig {
    /// Require HTTPS target URLs.
    pub enforce_https: bool,
    /// Reject private and local peer addresses.
    pub block_private_networks: bool,
    /// User agent for outbound requests.
    pub user_agent: String,
}

impl Default for DelivererConfig {
    fn default() -> Self {
        Self {
            enforce_https: true,
            block_private_networks: true,
            user_agent: "relay-gate/0.1".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Deliverer
// ============================================================================

/// SSRF-guarded HTTP deliverer.
pub struct HttpDeliverer {
    /// Policy configuration.
    config: DelivererConfig,
}

impl HttpDeliverer {
    /// Creates a deliverer with the given policy.
    #[must_use]
    pub const fn new(config: DelivererConfig) -> Self {
        Self {
            config,
        }
    }

    /// Builds a client pinned to one resolved peer address.
    fn client_for(
        &self,
        resolved: &ResolvedHost,
        ip: IpAddr,
        timeout_ms: u64,
    ) -> Result<reqwest::Client, DeliveryError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(self.config.user_agent.clone())
            .redirect(Policy::none());
        if resolved.is_domain {
            builder = builder.resolve(&resolved.host, SocketAddr::new(ip, resolved.port));
        }
        builder.build().map_err(|err| {
            DeliveryError::new(
                ErrorCategory::Internal,
                "client_build",
                format!("http client build failed: {err}"),
            )
        })
    }

    /// Issues the request against one pinned peer.
    async fn send_once(
        &self,
        request: &OutboundRequest,
        resolved: &ResolvedHost,
        ip: IpAddr,
    ) -> DispatchOutcome {
        let client = match self.client_for(resolved, ip, request.timeout_ms) {
            Ok(client) => client,
            Err(error) => {
                return DispatchOutcome::Failure {
                    error,
                    response: None,
                    retry_after_ms: None,
                };
            }
        };
        let mut builder = client.request(request_method(request.method), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }
        let started = Instant::now();
        match builder.send().await {
            Ok(response) => capture_response(response, started).await,
            Err(err) => {
                let category = if err.is_timeout() {
                    ErrorCategory::Timeout
                } else {
                    ErrorCategory::Network
                };
                let code = if err.is_timeout() {
                    "deadline"
                } else if err.is_connect() {
                    "connect"
                } else {
                    "transport"
                };
                DispatchOutcome::Failure {
                    error: DeliveryError::new(category, code, err.without_url().to_string()),
                    response: None,
                    retry_after_ms: None,
                }
            }
        }
    }
}

#[async_trait]
impl RequestDispatcher for HttpDeliverer {
    async fn dispatch(&self, request: &OutboundRequest) -> DispatchOutcome {
        let resolved = match resolve_target(&request.url, &self.config).await {
            Ok(resolved) => resolved,
            Err(error) => {
                return DispatchOutcome::Failure {
                    error,
                    response: None,
                    retry_after_ms: None,
                };
            }
        };
        let mut last: Option<DispatchOutcome> = None;
        for ip in &resolved.ips {
            let outcome = self.send_once(request, &resolved, *ip).await;
            match &outcome {
                DispatchOutcome::Failure {
                    error, ..
                } if error.category == ErrorCategory::Network => {
                    // Another resolved peer may still be reachable.
                    last = Some(outcome);
                }
                _ => return outcome,
            }
        }
        last.unwrap_or_else(|| DispatchOutcome::Failure {
            error: DeliveryError::new(
                ErrorCategory::Network,
                "no_peers",
                "no resolved peer accepted the connection",
            ),
            response: None,
            retry_after_ms: None,
        })
    }
}

// ============================================================================
// SECTION: Response Classification
// ============================================================================

/// Maps an HTTP status to its failure category; `None` means success.
#[must_use]
pub fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        200..=299 => None,
        401 | 403 => Some(ErrorCategory::Auth),
        408 => Some(ErrorCategory::Timeout),
        429 => Some(ErrorCategory::RateLimit),
        400..=499 => Some(ErrorCategory::Validation),
        _ => Some(ErrorCategory::ServerError),
    }
}

/// Captures and classifies one received response.
async fn capture_response(response: reqwest::Response, started: Instant) -> DispatchOutcome {
    let status = response.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    let retry_after_ms = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(|seconds| seconds.saturating_mul(1_000));
    let body = match response.text().await {
        Ok(text) => truncate_body(&text),
        Err(_) => String::new(),
    };
    let capture = DispatchResponse {
        status,
        headers,
        body,
        duration_ms: duration_ms(started),
    };
    match classify_status(status) {
        None => DispatchOutcome::Success(capture),
        Some(category) => DispatchOutcome::Failure {
            error: DeliveryError::with_status(
                category,
                "http_status",
                status,
                format!("target responded with status {status}"),
            ),
            response: Some(capture),
            retry_after_ms: if category == ErrorCategory::RateLimit {
                retry_after_ms
            } else {
                None
            },
        },
    }
}

/// Converts the core method into a reqwest method.
fn request_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Returns elapsed milliseconds since `started`.
fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: SSRF Policy
// ============================================================================

/// Resolved host metadata for pinned outbound requests.
///
/// # Invariants
/// - `ips` is non-empty, deduplicated, and policy-checked.
struct ResolvedHost {
    /// Host string used for DNS pinning.
    host: String,
    /// Effective request port.
    port: u16,
    /// Resolved candidate peer IPs.
    ips: Vec<IpAddr>,
    /// True when host is a DNS name rather than a literal address.
    is_domain: bool,
}

/// Validates the URL and resolves peers under the SSRF policy.
async fn resolve_target(
    raw_url: &str,
    config: &DelivererConfig,
) -> Result<ResolvedHost, DeliveryError> {
    let url = Url::parse(raw_url)
        .map_err(|_| ssrf_error(format!("invalid target url: {raw_url}")))?;
    match url.scheme() {
        "https" => {}
        "http" if !config.enforce_https => {}
        "http" => return Err(ssrf_error("https is required for target urls".to_string())),
        other => return Err(ssrf_error(format!("unsupported url scheme: {other}"))),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ssrf_error("url credentials are not allowed".to_string()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ssrf_error("target url requires a host".to_string()))?;
    let host_label = normalize_host_label(host);
    if config.block_private_networks && host_label == "localhost" {
        return Err(ssrf_error("hostname localhost is blocked".to_string()));
    }
    let host_for_resolution =
        host.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')).unwrap_or(host);
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ssrf_error("target url requires a port".to_string()))?;

    let mut ips = resolve_host_ips(host_for_resolution, port).await?;
    if ips.is_empty() {
        return Err(ssrf_error(format!("host has no resolved addresses: {host_label}")));
    }
    if config.block_private_networks {
        for ip in &ips {
            if is_private_or_link_local(ip) {
                return Err(ssrf_error(format!(
                    "host resolves to a private or local address: {host_label}"
                )));
            }
        }
    }
    dedupe_ips(&mut ips);
    Ok(ResolvedHost {
        host: host_for_resolution.to_string(),
        port,
        ips,
        is_domain: host_for_resolution.parse::<IpAddr>().is_err(),
    })
}

/// Resolves hostnames to peer IPs used for policy checks and pinning.
async fn resolve_host_ips(host: &str, port: u16) -> Result<Vec<IpAddr>, DeliveryError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| ssrf_error(format!("host resolution failed: {err}")))?;
    Ok(addrs.map(|addr| addr.ip()).collect())
}

/// Returns true when an IP is private, loopback, link-local, or local.
const fn is_private_or_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => {
            addr.is_private()
                || addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_multicast()
                || addr.is_broadcast()
        }
        IpAddr::V6(addr) => {
            let mapped_private = if let Some(mapped) = addr.to_ipv4_mapped() {
                mapped.is_private()
                    || mapped.is_loopback()
                    || mapped.is_link_local()
                    || mapped.is_unspecified()
                    || mapped.is_multicast()
                    || mapped.is_broadcast()
            } else {
                false
            };
            mapped_private
                || addr.is_loopback()
                || addr.is_unique_local()
                || addr.is_unicast_link_local()
                || addr.is_unspecified()
                || addr.is_multicast()
        }
    }
}

/// Normalizes host labels for policy comparisons.
fn normalize_host_label(host: &str) -> String {
    let trimmed = host.trim_end_matches('.');
    let trimmed =
        trimmed.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')).unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

/// Deduplicates IP addresses while preserving resolution order.
fn dedupe_ips(ips: &mut Vec<IpAddr>) {
    let mut unique = Vec::with_capacity(ips.len());
    for ip in ips.drain(..) {
        if !unique.contains(&ip) {
            unique.push(ip);
        }
    }
    *ips = unique;
}

/// Builds an `SSRF`-category error.
fn ssrf_error(message: String) -> DeliveryError {
    DeliveryError::new(ErrorCategory::Ssrf, "ssrf_policy", message)
}
