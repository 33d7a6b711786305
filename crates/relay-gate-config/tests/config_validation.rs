// crates/relay-gate-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Tests for config parsing, clamping, and fail-closed paths.
// Purpose: Exercise file loading, unknown-field rejection, and clamps.
// Dependencies: relay-gate-config, tempfile
// ============================================================================
//! ## Overview
//! Validates configuration loading from TOML and the clamp behavior of
//! every bounded knob.

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

use std::io::Write;

use relay_gate_config::GatewayConfig;
use relay_gate_config::load_config;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_validate_cleanly() {
    let mut config = GatewayConfig::default();
    let adjustments = config.validate().unwrap();
    // Only the unset port is adjusted.
    assert_eq!(adjustments, vec!["port 0 -> 8080".to_string()]);
    assert!(config.worker.enabled);
    assert!(config.security.enforce_https);
    assert!(config.security.block_private_networks);
    assert_eq!(config.worker.dlq.batch_size, 50);
    assert_eq!(config.scheduler.interval_ms, 60_000);
}

#[test]
fn file_values_load_and_clamp() {
    let file = write_config(
        r#"
port = 9090

[state_store]
uri = "gateway.db"
database = "relay"

[worker]
interval_ms = 5
batch_size = 10000
pool_size = 4

[worker.dlq]
max_retries = 99

[scheduler]
enabled = false
"#,
    );
    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.port, 9090);
    assert_eq!(config.state_store.uri, "gateway.db");
    // Out-of-range values clamp to their bounds.
    assert_eq!(config.worker.interval_ms, 250);
    assert_eq!(config.worker.batch_size, 500);
    assert_eq!(config.worker.pool_size, 4);
    assert_eq!(config.worker.dlq.max_retries, 20);
    assert!(!config.scheduler.enabled);
}

#[test]
fn unknown_fields_are_rejected() {
    let file = write_config("port = 1\nnot_a_field = true\n");
    assert!(load_config(Some(file.path())).is_err());
}

#[test]
fn missing_explicit_path_fails() {
    let missing = std::path::Path::new("/nonexistent/relay-gate.toml");
    assert!(load_config(Some(missing)).is_err());
}

#[test]
fn empty_store_uri_fails_closed() {
    let file = write_config("[state_store]\nuri = \"  \"\n");
    assert!(load_config(Some(file.path())).is_err());
}

#[test]
fn security_toggles_parse_from_file() {
    let file = write_config(
        r#"
[security]
enforce_https = false
block_private_networks = false
"#,
    );
    let config = load_config(Some(file.path())).unwrap();
    assert!(!config.security.enforce_https);
    assert!(!config.security.block_private_networks);
}
