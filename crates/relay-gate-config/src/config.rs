// crates/relay-gate-config/src/config.rs
// ============================================================================
// Module: Relay Gate Configuration
// Description: Configuration loading and validation for the gateway process.
// Purpose: Provide strict, fail-closed config parsing with clamped knobs.
// Dependencies: relay-gate-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a hard size limit and
//! unknown-field rejection, then overridden by `RELAY_GATE_*` environment
//! variables, then validated. Validation clamps every numeric knob into its
//! documented range so a typo degrades to a safe value instead of an unsafe
//! one. Invalid structure fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "relay-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "RELAY_GATE_CONFIG";
/// Prefix for value-override environment variables.
pub const ENV_OVERRIDE_PREFIX: &str = "RELAY_GATE_";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

/// Minimum worker poll interval in milliseconds.
pub const MIN_WORKER_INTERVAL_MS: u64 = 250;
/// Maximum worker poll interval in milliseconds.
pub const MAX_WORKER_INTERVAL_MS: u64 = 300_000;
/// Minimum worker batch size.
pub const MIN_WORKER_BATCH: usize = 1;
/// Maximum worker batch size.
pub const MAX_WORKER_BATCH: usize = 500;
/// Minimum delivery pool size.
pub const MIN_POOL_SIZE: usize = 1;
/// Maximum delivery pool size.
pub const MAX_POOL_SIZE: usize = 256;
/// Maximum DLQ retry budget.
pub const MAX_DLQ_MAX_RETRIES: u32 = 20;
/// Maximum execution-log retention in days.
pub const MAX_LOG_RETENTION_DAYS: u32 = 365;
/// Maximum event age accepted from sources, in days.
pub const MAX_EVENT_AGE_DAYS: u32 = 90;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config read failure at {path}: {message}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// I/O failure detail.
        message: String,
    },
    /// Config file exceeds the size limit.
    #[error("config file {path} exceeds {MAX_CONFIG_FILE_SIZE} bytes")]
    TooLarge {
        /// Offending path.
        path: PathBuf,
    },
    /// Config file failed TOML parsing.
    #[error("config parse failure: {0}")]
    Parse(String),
    /// An environment override held an unusable value.
    #[error("environment override {variable} is invalid: {message}")]
    EnvOverride {
        /// Offending variable name.
        variable: String,
        /// Parse failure detail.
        message: String,
    },
    /// A non-clampable field failed validation.
    #[error("config validation failure: {0}")]
    Validation(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// State store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StateStoreConfig {
    /// Store location (SQLite path, or `:memory:` for demos).
    pub uri: String,
    /// Logical database name, recorded in health output.
    pub database: String,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            uri: "relay-gate.db".to_string(),
            database: "relay_gate".to_string(),
        }
    }
}

/// Security toggles for inbound and outbound traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SecurityConfig {
    /// API key expected by the control-plane collaborator; unused by core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// JWT secret for the control-plane collaborator; unused by core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Require HTTPS target URLs for outbound delivery.
    pub enforce_https: bool,
    /// Reject targets resolving to private or local networks.
    pub block_private_networks: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            jwt_secret: None,
            enforce_https: true,
            block_private_networks: true,
        }
    }
}

/// Dead-letter queue worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DlqConfig {
    /// Whether the DLQ worker runs.
    pub enabled: bool,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Entries claimed per tick.
    pub batch_size: usize,
    /// Retry budget before abandonment.
    pub max_retries: u32,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            batch_size: 50,
            max_retries: 5,
        }
    }
}

/// Delivery worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkerConfig {
    /// Whether the delivery worker runs.
    pub enabled: bool,
    /// Source poll interval in milliseconds.
    pub interval_ms: u64,
    /// Events pulled per source per tick.
    pub batch_size: usize,
    /// Default delay between actions when an integration sets none.
    pub multi_action_delay_ms: u64,
    /// Events older than this are dropped at ingestion.
    pub max_event_age_days: u32,
    /// Delivery task pool size.
    pub pool_size: usize,
    /// Execution-log retention in days.
    pub log_retention_days: u32,
    /// DLQ worker settings.
    pub dlq: DlqConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2_000,
            batch_size: 50,
            multi_action_delay_ms: 0,
            max_event_age_days: 7,
            pool_size: 32,
            log_retention_days: 30,
            dlq: DlqConfig::default(),
        }
    }
}

/// Scheduler worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Whether the scheduler worker runs.
    pub enabled: bool,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Rows claimed per tick.
    pub batch_size: usize,
    /// Scheduler task pool size.
    pub pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            batch_size: 50,
            pool_size: 16,
        }
    }
}

/// Scheduled-job worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JobsConfig {
    /// Whether the scheduled-job worker runs.
    pub enabled: bool,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Hard budget for one data-source fetch, in milliseconds.
    pub fetch_budget_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            fetch_budget_ms: 30_000,
        }
    }
}

/// Alerting thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AlertConfig {
    /// DLQ depth that triggers an alert.
    pub dlq_depth_threshold: u64,
    /// Failure-burst detection window in seconds.
    pub burst_window_seconds: u32,
    /// Failures within the window that trigger an alert.
    pub burst_threshold: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dlq_depth_threshold: 500,
            burst_window_seconds: 300,
            burst_threshold: 25,
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Process-wide gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// HTTP listen port for health and push endpoints.
    pub port: u16,
    /// State store settings.
    pub state_store: StateStoreConfig,
    /// Security toggles.
    pub security: SecurityConfig,
    /// Delivery worker settings.
    pub worker: WorkerConfig,
    /// Scheduler worker settings.
    pub scheduler: SchedulerConfig,
    /// Scheduled-job worker settings.
    pub jobs: JobsConfig,
    /// Alerting thresholds.
    pub alerts: AlertConfig,
    /// Environment variable names exposed to `{{env.NAME}}` substitution.
    pub env_allowlist: Vec<String>,
}

impl GatewayConfig {
    /// Validates the configuration, clamping numeric knobs into range.
    ///
    /// Returns the list of clamp adjustments applied, for operator
    /// visibility in `check-config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for non-clampable violations.
    pub fn validate(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut adjustments = Vec::new();
        if self.state_store.uri.trim().is_empty() {
            return Err(ConfigError::Validation("state_store.uri must not be empty".to_string()));
        }
        if self.port == 0 {
            self.port = 8080;
            adjustments.push("port 0 -> 8080".to_string());
        }
        clamp_field(
            &mut self.worker.interval_ms,
            MIN_WORKER_INTERVAL_MS,
            MAX_WORKER_INTERVAL_MS,
            "worker.interval_ms",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.batch_size,
            MIN_WORKER_BATCH,
            MAX_WORKER_BATCH,
            "worker.batch_size",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.multi_action_delay_ms,
            0,
            relay_gate_core::integration::MAX_MULTI_ACTION_DELAY_MS,
            "worker.multi_action_delay_ms",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.max_event_age_days,
            1,
            MAX_EVENT_AGE_DAYS,
            "worker.max_event_age_days",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.pool_size,
            MIN_POOL_SIZE,
            MAX_POOL_SIZE,
            "worker.pool_size",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.log_retention_days,
            1,
            MAX_LOG_RETENTION_DAYS,
            "worker.log_retention_days",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.dlq.interval_ms,
            MIN_WORKER_INTERVAL_MS,
            MAX_WORKER_INTERVAL_MS,
            "worker.dlq.interval_ms",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.dlq.batch_size,
            MIN_WORKER_BATCH,
            MAX_WORKER_BATCH,
            "worker.dlq.batch_size",
            &mut adjustments,
        );
        clamp_field(
            &mut self.worker.dlq.max_retries,
            1,
            MAX_DLQ_MAX_RETRIES,
            "worker.dlq.max_retries",
            &mut adjustments,
        );
        clamp_field(
            &mut self.scheduler.interval_ms,
            MIN_WORKER_INTERVAL_MS,
            MAX_WORKER_INTERVAL_MS,
            "scheduler.interval_ms",
            &mut adjustments,
        );
        clamp_field(
            &mut self.scheduler.batch_size,
            MIN_WORKER_BATCH,
            MAX_WORKER_BATCH,
            "scheduler.batch_size",
            &mut adjustments,
        );
        clamp_field(
            &mut self.scheduler.pool_size,
            MIN_POOL_SIZE,
            MAX_POOL_SIZE,
            "scheduler.pool_size",
            &mut adjustments,
        );
        clamp_field(
            &mut self.jobs.interval_ms,
            MIN_WORKER_INTERVAL_MS,
            MAX_WORKER_INTERVAL_MS,
            "jobs.interval_ms",
            &mut adjustments,
        );
        clamp_field(
            &mut self.jobs.fetch_budget_ms,
            1_000,
            30_000,
            "jobs.fetch_budget_ms",
            &mut adjustments,
        );
        Ok(adjustments)
    }

    /// Snapshots the allowlisted environment variables for substitution.
    #[must_use]
    pub fn env_snapshot(&self) -> BTreeMap<String, String> {
        self.env_allowlist
            .iter()
            .filter_map(|name| env::var(name).ok().map(|value| (name.clone(), value)))
            .collect()
    }
}

/// Clamps one numeric field, recording the adjustment.
fn clamp_field<T>(
    field: &mut T,
    min: T,
    max: T,
    name: &str,
    adjustments: &mut Vec<String>,
) where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if *field < min {
        adjustments.push(format!("{name} {field} -> {min}"));
        *field = min;
    } else if *field > max {
        adjustments.push(format!("{name} {field} -> {max}"));
        *field = max;
    }
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Loads, overrides, and validates gateway configuration.
///
/// Resolution order: explicit `path`, the `RELAY_GATE_CONFIG` variable, then
/// `relay-gate.toml` in the working directory. An explicit path must exist;
/// a missing default file yields built-in defaults. Environment overrides
/// are applied after parsing, validation clamps last.
///
/// # Errors
///
/// Returns [`ConfigError`] for unreadable files, oversize files, parse
/// failures, bad overrides, or validation failures.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let explicit = path.map(Path::to_path_buf).or_else(|| {
        env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
    });
    let mut config = match explicit {
        Some(path) => read_config_file(&path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
            if default_path.is_file() {
                read_config_file(&default_path)?
            } else {
                GatewayConfig::default()
            }
        }
    };
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Reads and parses one config file with the size limit enforced.
fn read_config_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    if raw.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
        });
    }
    toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))
}

/// Applies `RELAY_GATE_*` environment overrides onto a parsed config.
fn apply_env_overrides(config: &mut GatewayConfig) -> Result<(), ConfigError> {
    if let Some(value) = env_override("PORT")? {
        config.port = parse_env("PORT", &value)?;
    }
    if let Some(value) = env_override("STATE_STORE_URI")? {
        config.state_store.uri = value;
    }
    if let Some(value) = env_override("STATE_STORE_DATABASE")? {
        config.state_store.database = value;
    }
    if let Some(value) = env_override("SECURITY_API_KEY")? {
        config.security.api_key = Some(value);
    }
    if let Some(value) = env_override("SECURITY_JWT_SECRET")? {
        config.security.jwt_secret = Some(value);
    }
    if let Some(value) = env_override("SECURITY_ENFORCE_HTTPS")? {
        config.security.enforce_https = parse_env("SECURITY_ENFORCE_HTTPS", &value)?;
    }
    if let Some(value) = env_override("SECURITY_BLOCK_PRIVATE_NETWORKS")? {
        config.security.block_private_networks =
            parse_env("SECURITY_BLOCK_PRIVATE_NETWORKS", &value)?;
    }
    if let Some(value) = env_override("WORKER_ENABLED")? {
        config.worker.enabled = parse_env("WORKER_ENABLED", &value)?;
    }
    if let Some(value) = env_override("WORKER_INTERVAL_MS")? {
        config.worker.interval_ms = parse_env("WORKER_INTERVAL_MS", &value)?;
    }
    if let Some(value) = env_override("WORKER_BATCH_SIZE")? {
        config.worker.batch_size = parse_env("WORKER_BATCH_SIZE", &value)?;
    }
    if let Some(value) = env_override("WORKER_DLQ_ENABLED")? {
        config.worker.dlq.enabled = parse_env("WORKER_DLQ_ENABLED", &value)?;
    }
    if let Some(value) = env_override("WORKER_DLQ_INTERVAL_MS")? {
        config.worker.dlq.interval_ms = parse_env("WORKER_DLQ_INTERVAL_MS", &value)?;
    }
    if let Some(value) = env_override("WORKER_DLQ_MAX_RETRIES")? {
        config.worker.dlq.max_retries = parse_env("WORKER_DLQ_MAX_RETRIES", &value)?;
    }
    if let Some(value) = env_override("SCHEDULER_ENABLED")? {
        config.scheduler.enabled = parse_env("SCHEDULER_ENABLED", &value)?;
    }
    if let Some(value) = env_override("SCHEDULER_INTERVAL_MS")? {
        config.scheduler.interval_ms = parse_env("SCHEDULER_INTERVAL_MS", &value)?;
    }
    if let Some(value) = env_override("JOBS_ENABLED")? {
        config.jobs.enabled = parse_env("JOBS_ENABLED", &value)?;
    }
    if let Some(value) = env_override("JOBS_INTERVAL_MS")? {
        config.jobs.interval_ms = parse_env("JOBS_INTERVAL_MS", &value)?;
    }
    Ok(())
}

/// Reads one override variable under the gateway prefix.
fn env_override(suffix: &str) -> Result<Option<String>, ConfigError> {
    match env::var(format!("{ENV_OVERRIDE_PREFIX}{suffix}")) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::EnvOverride {
            variable: format!("{ENV_OVERRIDE_PREFIX}{suffix}"),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

/// Parses one override value into its typed field.
fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::EnvOverride {
        variable: format!("{ENV_OVERRIDE_PREFIX}{suffix}"),
        message: err.to_string(),
    })
}
