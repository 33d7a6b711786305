// crates/relay-gate-delivery/tests/http_deliverer.rs
// ============================================================================
// Module: HTTP Deliverer Tests
// Description: Tests for SSRF policy and outcome classification.
// Purpose: Exercise policy rejections and live classification paths.
// Dependencies: relay-gate-delivery, relay-gate-core, tiny_http, tokio
// ============================================================================
//! ## Overview
//! Validates that the SSRF policy rejects private and local targets before
//! any connection, and that live responses classify per the delivery table.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;

use relay_gate_core::ErrorCategory;
use relay_gate_core::HttpMethod;
use relay_gate_core::interfaces::DispatchOutcome;
use relay_gate_core::interfaces::OutboundRequest;
use relay_gate_core::interfaces::RequestDispatcher;
use relay_gate_delivery::DelivererConfig;
use relay_gate_delivery::HttpDeliverer;
use relay_gate_delivery::classify_status;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

fn request_to(url: &str) -> OutboundRequest {
    OutboundRequest {
        method: HttpMethod::Post,
        url: url.to_string(),
        headers: BTreeMap::new(),
        body: Some(r#"{"k":1}"#.to_string()),
        timeout_ms: 5_000,
    }
}

fn strict_deliverer() -> HttpDeliverer {
    HttpDeliverer::new(DelivererConfig::default())
}

fn local_deliverer() -> HttpDeliverer {
    HttpDeliverer::new(DelivererConfig {
        enforce_https: false,
        block_private_networks: false,
        user_agent: "relay-gate-test/0".to_string(),
    })
}

/// Serves one request with the given responder on a background thread.
fn serve_once(
    responder: impl FnOnce(tiny_http::Request) + Send + 'static,
) -> (String, std::thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_string();
    let handle = std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            responder(request);
        }
    });
    (format!("http://{addr}/hook"), handle)
}

#[test]
fn status_classification_matches_the_delivery_table() {
    assert_eq!(classify_status(200), None);
    assert_eq!(classify_status(204), None);
    assert_eq!(classify_status(301), Some(ErrorCategory::ServerError));
    assert_eq!(classify_status(401), Some(ErrorCategory::Auth));
    assert_eq!(classify_status(403), Some(ErrorCategory::Auth));
    assert_eq!(classify_status(408), Some(ErrorCategory::Timeout));
    assert_eq!(classify_status(422), Some(ErrorCategory::Validation));
    assert_eq!(classify_status(429), Some(ErrorCategory::RateLimit));
    assert_eq!(classify_status(500), Some(ErrorCategory::ServerError));
    assert_eq!(classify_status(503), Some(ErrorCategory::ServerError));
}

#[tokio::test]
async fn private_targets_are_rejected_before_any_connection() {
    let deliverer = strict_deliverer();
    for url in [
        "https://192.168.0.10/ingest",
        "https://10.1.2.3/ingest",
        "https://172.16.0.9/ingest",
        "https://127.0.0.1/ingest",
        "https://localhost/ingest",
        "https://[::1]/ingest",
    ] {
        let outcome = deliverer.dispatch(&request_to(url)).await;
        let DispatchOutcome::Failure {
            error,
            response,
            ..
        } = outcome
        else {
            panic!("expected rejection for {url}");
        };
        assert_eq!(error.category, ErrorCategory::Ssrf, "url {url}");
        assert!(response.is_none());
    }
}

#[tokio::test]
async fn cleartext_http_requires_an_explicit_opt_out() {
    let deliverer = strict_deliverer();
    let outcome = deliverer.dispatch(&request_to("http://ex.test/hook")).await;
    assert!(matches!(
        outcome,
        DispatchOutcome::Failure {
            error,
            ..
        } if error.category == ErrorCategory::Ssrf
    ));
}

#[tokio::test]
async fn url_credentials_are_rejected() {
    let deliverer = strict_deliverer();
    let outcome = deliverer.dispatch(&request_to("https://user:pw@ex.test/hook")).await;
    assert!(matches!(
        outcome,
        DispatchOutcome::Failure {
            error,
            ..
        } if error.category == ErrorCategory::Ssrf
    ));
}

#[tokio::test]
async fn successful_delivery_captures_the_response() {
    let (url, handle) = serve_once(|request| {
        let response = Response::from_string(r#"{"accepted":true}"#);
        let _ = request.respond(response);
    });
    let outcome = local_deliverer().dispatch(&request_to(&url)).await;
    handle.join().unwrap();

    let DispatchOutcome::Success(response) = outcome else {
        panic!("expected success");
    };
    assert_eq!(response.status, 200);
    assert_eq!(response.body, r#"{"accepted":true}"#);
}

#[tokio::test]
async fn server_errors_classify_as_retryable() {
    let (url, handle) = serve_once(|request| {
        let response = Response::from_string("upstream down").with_status_code(503);
        let _ = request.respond(response);
    });
    let outcome = local_deliverer().dispatch(&request_to(&url)).await;
    handle.join().unwrap();

    let DispatchOutcome::Failure {
        error,
        response,
        retry_after_ms,
    } = outcome
    else {
        panic!("expected failure");
    };
    assert_eq!(error.category, ErrorCategory::ServerError);
    assert!(error.category.is_retryable());
    assert_eq!(error.status_code, Some(503));
    assert_eq!(response.unwrap().status, 503);
    assert!(retry_after_ms.is_none());
}

#[tokio::test]
async fn rate_limited_responses_carry_retry_after() {
    let (url, handle) = serve_once(|request| {
        let header = Header::from_bytes(&b"Retry-After"[..], &b"120"[..]).unwrap();
        let response = Response::from_string("slow down")
            .with_status_code(429)
            .with_header(header);
        let _ = request.respond(response);
    });
    let outcome = local_deliverer().dispatch(&request_to(&url)).await;
    handle.join().unwrap();

    let DispatchOutcome::Failure {
        error,
        retry_after_ms,
        ..
    } = outcome
    else {
        panic!("expected failure");
    };
    assert_eq!(error.category, ErrorCategory::RateLimit);
    assert_eq!(retry_after_ms, Some(120_000));
}

#[tokio::test]
async fn validation_failures_are_not_retryable() {
    let (url, handle) = serve_once(|request| {
        let response = Response::from_string("bad payload").with_status_code(422);
        let _ = request.respond(response);
    });
    let outcome = local_deliverer().dispatch(&request_to(&url)).await;
    handle.join().unwrap();

    let DispatchOutcome::Failure {
        error, ..
    } = outcome
    else {
        panic!("expected failure");
    };
    assert_eq!(error.category, ErrorCategory::Validation);
    assert!(!error.category.is_retryable());
}

#[tokio::test]
async fn unreachable_targets_classify_as_network() {
    // Reserved TEST-NET-1 address; nothing listens there.
    let deliverer = HttpDeliverer::new(DelivererConfig {
        enforce_https: false,
        block_private_networks: false,
        user_agent: "relay-gate-test/0".to_string(),
    });
    let mut request = request_to("http://192.0.2.1:9/hook");
    request.timeout_ms = 750;
    let outcome = deliverer.dispatch(&request).await;
    let DispatchOutcome::Failure {
        error, ..
    } = outcome
    else {
        panic!("expected failure");
    };
    assert!(matches!(error.category, ErrorCategory::Network | ErrorCategory::Timeout));
}
