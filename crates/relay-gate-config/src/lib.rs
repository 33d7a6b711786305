// crates/relay-gate-config/src/lib.rs
// ============================================================================
// Module: Relay Gate Configuration Library
// Description: Public API surface for process configuration.
// Purpose: Expose config loading, validation, and effective values.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Process-wide configuration for the gateway: a TOML file with strict
//! limits, environment-variable overrides, and fail-closed validation that
//! clamps every numeric knob into its documented range.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Configuration loading and validation.
pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AlertConfig;
pub use config::ConfigError;
pub use config::DlqConfig;
pub use config::GatewayConfig;
pub use config::JobsConfig;
pub use config::SchedulerConfig;
pub use config::SecurityConfig;
pub use config::StateStoreConfig;
pub use config::WorkerConfig;
pub use config::load_config;
