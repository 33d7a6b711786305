// crates/relay-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite State Store
// Description: Durable gateway state store backed by SQLite WAL.
// Purpose: Persist documents with index columns, CAS claims, and TTL sweeps.
// Dependencies: relay-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every collection stores its document as canonical JSON text plus the
//! columns its queries index: integrations `(org, direction, active, event
//! type)`, execution logs `(org, started_at)` and the idempotency triple,
//! DLQ `(status, next_retry_at)`, rate-limit windows unique on
//! `(integration, window_start)`. Claim operations are single `UPDATE …
//! WHERE status = ?` statements so concurrent replicas never double-claim.
//! Decoding failures fail closed as [`StoreError::Invalid`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use relay_gate_core::DeliveryError;
use relay_gate_core::DeliveryId;
use relay_gate_core::Direction;
use relay_gate_core::DlqEntry;
use relay_gate_core::DlqId;
use relay_gate_core::DlqStatus;
use relay_gate_core::EventSourceConfig;
use relay_gate_core::ExecutionLog;
use relay_gate_core::Fingerprint;
use relay_gate_core::IntegrationConfig;
use relay_gate_core::IntegrationId;
use relay_gate_core::JobId;
use relay_gate_core::LogStatus;
use relay_gate_core::LookupTable;
use relay_gate_core::OrgId;
use relay_gate_core::PendingDelivery;
use relay_gate_core::PendingStatus;
use relay_gate_core::ScheduledJob;
use relay_gate_core::ScheduledJobLog;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::SourceType;
use relay_gate_core::Timestamp;
use relay_gate_core::TraceId;
use relay_gate_core::TraceStep;
use relay_gate_core::interfaces::CheckpointStore;
use relay_gate_core::interfaces::DlqStore;
use relay_gate_core::interfaces::EventSourceStore;
use relay_gate_core::interfaces::ExecutionLogStore;
use relay_gate_core::interfaces::IntegrationStore;
use relay_gate_core::interfaces::LogCompletion;
use relay_gate_core::interfaces::LookupStore;
use relay_gate_core::interfaces::PendingDeliveryStore;
use relay_gate_core::interfaces::RateLimitStore;
use relay_gate_core::interfaces::ScheduledJobStore;
use relay_gate_core::interfaces::StoreError;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum accepted document size in bytes.
pub const MAX_DOC_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` state store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file, or `:memory:` for ephemeral stores.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config with default pragmas for the given path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Document exceeded the configured size limit.
    #[error("sqlite store document too large: {actual_bytes} bytes (max {MAX_DOC_BYTES})")]
    TooLarge {
        /// Actual document size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge {
                actual_bytes,
            } => Self::Invalid(format!("document exceeds size limit: {actual_bytes} bytes")),
        }
    }
}

/// Maps a `rusqlite` error into a store error.
fn db_err(err: &rusqlite::Error) -> StoreError {
    StoreError::Store(format!("sqlite: {err}"))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed gateway state store.
#[derive(Clone)]
pub struct SqliteStateStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Opens the store, creating the schema when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Store("sqlite store mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Document Codec
// ============================================================================

/// Serializes a document to JSON text under the size limit.
fn encode_doc<T: Serialize>(value: &T) -> Result<String, StoreError> {
    let doc = serde_json::to_string(value)
        .map_err(|err| StoreError::Invalid(format!("document encode failure: {err}")))?;
    if doc.len() > MAX_DOC_BYTES {
        return Err(SqliteStoreError::TooLarge {
            actual_bytes: doc.len(),
        }
        .into());
    }
    Ok(doc)
}

/// Deserializes a stored document, failing closed on corruption.
fn decode_doc<T: DeserializeOwned>(doc: &str) -> Result<T, StoreError> {
    serde_json::from_str(doc)
        .map_err(|err| StoreError::Invalid(format!("document decode failure: {err}")))
}

// ============================================================================
// SECTION: Integration Store
// ============================================================================

impl IntegrationStore for SqliteStateStore {
    fn upsert_integration(&self, config: &IntegrationConfig) -> Result<(), StoreError> {
        let doc = encode_doc(config)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        tx.execute(
            "INSERT INTO integration_configs (
                org_id, integration_id, integration_name, direction, event_type,
                is_active, is_default, doc, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(org_id, integration_id) DO UPDATE SET
                integration_name = excluded.integration_name,
                direction = excluded.direction,
                event_type = excluded.event_type,
                is_active = excluded.is_active,
                is_default = excluded.is_default,
                doc = excluded.doc,
                updated_at = excluded.updated_at",
            params![
                config.org_id.as_i32(),
                config.id.as_str(),
                config.integration_name,
                direction_label(config.direction),
                config.event_type,
                i64::from(config.is_active),
                i64::from(config.is_default),
                doc,
                config.updated_at.as_unix_millis(),
            ],
        )
        .map_err(|err| db_err(&err))?;
        bump_org_version(&tx, config.org_id)?;
        tx.commit().map_err(|err| db_err(&err))
    }

    fn integration(
        &self,
        org_id: OrgId,
        id: &IntegrationId,
    ) -> Result<Option<IntegrationConfig>, StoreError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM integration_configs WHERE org_id = ?1 AND integration_id = ?2",
                params![org_id.as_i32(), id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        doc.map(|doc| decode_doc(&doc)).transpose()
    }

    fn active_outbound_defaults(
        &self,
        org_id: OrgId,
    ) -> Result<Vec<IntegrationConfig>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT doc FROM integration_configs
                 WHERE org_id = ?1 AND direction = 'OUTBOUND'
                   AND is_active = 1 AND is_default = 1
                 ORDER BY rowid",
            )
            .map_err(|err| db_err(&err))?;
        let docs = stmt
            .query_map(params![org_id.as_i32()], |row| row.get::<_, String>(0))
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?;
        docs.iter().map(|doc| decode_doc(doc)).collect()
    }

    fn swap_default_version(
        &self,
        org_id: OrgId,
        integration_name: &str,
        new_default: &IntegrationId,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let rows: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT integration_id, doc FROM integration_configs
                     WHERE org_id = ?1 AND integration_name = ?2",
                )
                .map_err(|err| db_err(&err))?;
            stmt.query_map(params![org_id.as_i32(), integration_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<(String, String)>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?
        };
        if !rows.iter().any(|(id, _)| id == new_default.as_str()) {
            return Err(StoreError::NotFound(format!(
                "integration {new_default} not found under name {integration_name}"
            )));
        }
        for (id, doc) in rows {
            let mut config: IntegrationConfig = decode_doc(&doc)?;
            config.is_default = id == new_default.as_str();
            let updated = encode_doc(&config)?;
            tx.execute(
                "UPDATE integration_configs SET is_default = ?1, doc = ?2
                 WHERE org_id = ?3 AND integration_id = ?4",
                params![i64::from(config.is_default), updated, org_id.as_i32(), id],
            )
            .map_err(|err| db_err(&err))?;
        }
        bump_org_version(&tx, org_id)?;
        tx.commit().map_err(|err| db_err(&err))
    }

    fn integrations_version(&self, org_id: OrgId) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let version: Option<i64> = guard
            .query_row(
                "SELECT version FROM org_versions WHERE org_id = ?1",
                params![org_id.as_i32()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        Ok(version.map_or(0, |value| u64::try_from(value).unwrap_or(0)))
    }
}

/// Bumps the per-org integration mutation counter inside a transaction.
fn bump_org_version(tx: &rusqlite::Transaction<'_>, org_id: OrgId) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO org_versions (org_id, version) VALUES (?1, 1)
         ON CONFLICT(org_id) DO UPDATE SET version = version + 1",
        params![org_id.as_i32()],
    )
    .map(|_| ())
    .map_err(|err| db_err(&err))
}

/// Returns the stable direction label.
const fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => "OUTBOUND",
        Direction::Inbound => "INBOUND",
        Direction::Scheduled => "SCHEDULED",
    }
}

// ============================================================================
// SECTION: Event Source Store
// ============================================================================

impl EventSourceStore for SqliteStateStore {
    fn upsert_event_source(&self, config: &EventSourceConfig) -> Result<(), StoreError> {
        let doc = encode_doc(config)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO event_sources (org_id, is_active, doc, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(org_id) DO UPDATE SET
                    is_active = excluded.is_active,
                    doc = excluded.doc,
                    updated_at = excluded.updated_at",
                params![
                    config.org_id.as_i32(),
                    i64::from(config.is_active),
                    doc,
                    config.updated_at.as_unix_millis(),
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn active_event_sources(&self) -> Result<Vec<EventSourceConfig>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT doc FROM event_sources WHERE is_active = 1 ORDER BY org_id")
            .map_err(|err| db_err(&err))?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?;
        docs.iter().map(|doc| decode_doc(doc)).collect()
    }
}

// ============================================================================
// SECTION: Checkpoint Store
// ============================================================================

impl CheckpointStore for SqliteStateStore {
    fn checkpoint(
        &self,
        org_id: OrgId,
        source_type: SourceType,
    ) -> Result<Option<SourceCheckpoint>, StoreError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM source_checkpoints WHERE org_id = ?1 AND source_type = ?2",
                params![org_id.as_i32(), source_type.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        doc.map(|doc| decode_doc(&doc)).transpose()
    }

    fn advance_checkpoint(
        &self,
        org_id: OrgId,
        source_type: SourceType,
        checkpoint: &SourceCheckpoint,
    ) -> Result<(), StoreError> {
        let doc = encode_doc(checkpoint)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT doc FROM source_checkpoints WHERE org_id = ?1 AND source_type = ?2",
                params![org_id.as_i32(), source_type.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        if let Some(previous) = previous {
            let previous: SourceCheckpoint = decode_doc(&previous)?;
            if !checkpoint.advances(&previous) {
                return Err(StoreError::Conflict(format!(
                    "checkpoint regression for org {org_id} source {source_type}"
                )));
            }
        }
        tx.execute(
            "INSERT INTO source_checkpoints (org_id, source_type, doc, updated_at)
             VALUES (?1, ?2, ?3, strftime('%s','now') * 1000)
             ON CONFLICT(org_id, source_type) DO UPDATE SET
                doc = excluded.doc,
                updated_at = excluded.updated_at",
            params![org_id.as_i32(), source_type.as_str(), doc],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))
    }
}

// ============================================================================
// SECTION: Execution Log Store
// ============================================================================

impl SqliteStateStore {
    /// Reads, mutates, and rewrites one execution-log document atomically.
    fn update_log_doc(
        &self,
        trace_id: &TraceId,
        mutate: impl FnOnce(&mut ExecutionLog),
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM execution_logs WHERE trace_id = ?1",
                params![trace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        let doc = doc.ok_or_else(|| StoreError::NotFound(format!("trace {trace_id} not found")))?;
        let mut log: ExecutionLog = decode_doc(&doc)?;
        mutate(&mut log);
        let updated = encode_doc(&log)?;
        tx.execute(
            "UPDATE execution_logs SET doc = ?1, status = ?2 WHERE trace_id = ?3",
            params![updated, log.status.as_str(), trace_id.as_str()],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))
    }
}

impl ExecutionLogStore for SqliteStateStore {
    fn insert_log(&self, log: &ExecutionLog) -> Result<(), StoreError> {
        let doc = encode_doc(log)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO execution_logs (
                    trace_id, org_id, integration_id, fingerprint, status, started_at, doc
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(trace_id) DO UPDATE SET
                    status = excluded.status,
                    doc = excluded.doc",
                params![
                    log.trace_id.as_str(),
                    log.org_id.as_i32(),
                    log.integration_id.as_str(),
                    log.fingerprint.as_str(),
                    log.status.as_str(),
                    log.started_at.as_unix_millis(),
                    doc,
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn append_step(&self, trace_id: &TraceId, step: &TraceStep) -> Result<(), StoreError> {
        self.update_log_doc(trace_id, |log| log.steps.push(step.clone()))
    }

    fn set_log_status(&self, trace_id: &TraceId, status: LogStatus) -> Result<(), StoreError> {
        self.update_log_doc(trace_id, |log| log.status = status)
    }

    fn complete_log(
        &self,
        trace_id: &TraceId,
        completion: &LogCompletion,
    ) -> Result<(), StoreError> {
        self.update_log_doc(trace_id, |log| {
            log.status = completion.status;
            log.finished_at = Some(completion.finished_at);
            let duration = completion.finished_at.millis_since(log.started_at).max(0);
            log.duration_ms = Some(u64::try_from(duration).unwrap_or(0));
            if completion.request.is_some() {
                log.request = completion.request.clone();
            }
            if completion.response.is_some() {
                log.response = completion.response.clone();
            }
            log.error = completion.error.clone();
        })
    }

    fn execution_log(&self, trace_id: &TraceId) -> Result<Option<ExecutionLog>, StoreError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM execution_logs WHERE trace_id = ?1",
                params![trace_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        doc.map(|doc| decode_doc(&doc)).transpose()
    }

    fn has_terminal_log(
        &self,
        org_id: OrgId,
        fingerprint: &Fingerprint,
        integration_id: &IntegrationId,
    ) -> Result<bool, StoreError> {
        let guard = self.lock()?;
        let found: Option<i64> = guard
            .query_row(
                "SELECT 1 FROM execution_logs
                 WHERE org_id = ?1 AND fingerprint = ?2 AND integration_id = ?3
                   AND status IN ('SUCCESS', 'FAILED', 'ABANDONED')
                 LIMIT 1",
                params![org_id.as_i32(), fingerprint.as_str(), integration_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        Ok(found.is_some())
    }

    fn recent_logs(&self, org_id: OrgId, limit: usize) -> Result<Vec<ExecutionLog>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT doc FROM execution_logs WHERE org_id = ?1
                 ORDER BY started_at DESC LIMIT ?2",
            )
            .map_err(|err| db_err(&err))?;
        let docs = stmt
            .query_map(params![org_id.as_i32(), limit], |row| row.get::<_, String>(0))
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?;
        docs.iter().map(|doc| decode_doc(doc)).collect()
    }

    fn purge_logs_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let removed = guard
            .execute(
                "DELETE FROM execution_logs WHERE started_at < ?1",
                params![cutoff.as_unix_millis()],
            )
            .map_err(|err| db_err(&err))?;
        Ok(u64::try_from(removed).unwrap_or(0))
    }
}

// ============================================================================
// SECTION: DLQ Store
// ============================================================================

impl SqliteStateStore {
    /// Reads, mutates, and rewrites one DLQ document atomically.
    fn update_dlq_doc(
        &self,
        dlq_id: &DlqId,
        mutate: impl FnOnce(&mut DlqEntry),
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM dlq_entries WHERE dlq_id = ?1",
                params![dlq_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        let doc =
            doc.ok_or_else(|| StoreError::NotFound(format!("dlq entry {dlq_id} not found")))?;
        let mut entry: DlqEntry = decode_doc(&doc)?;
        mutate(&mut entry);
        let updated = encode_doc(&entry)?;
        tx.execute(
            "UPDATE dlq_entries SET doc = ?1, status = ?2, next_retry_at = ?3 WHERE dlq_id = ?4",
            params![
                updated,
                entry.status.as_str(),
                entry.next_retry_at.as_unix_millis(),
                dlq_id.as_str()
            ],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))
    }
}

impl DlqStore for SqliteStateStore {
    fn insert_dlq(&self, entry: &DlqEntry) -> Result<(), StoreError> {
        let doc = encode_doc(entry)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO dlq_entries (dlq_id, org_id, status, next_retry_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(dlq_id) DO UPDATE SET
                    status = excluded.status,
                    next_retry_at = excluded.next_retry_at,
                    doc = excluded.doc",
                params![
                    entry.dlq_id.as_str(),
                    entry.org_id.as_i32(),
                    entry.status.as_str(),
                    entry.next_retry_at.as_unix_millis(),
                    doc,
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn claim_due_dlq(&self, now: Timestamp, limit: usize) -> Result<Vec<DlqEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let ids: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT dlq_id FROM dlq_entries
                     WHERE status = 'PENDING_RETRY' AND next_retry_at <= ?1
                     ORDER BY next_retry_at LIMIT ?2",
                )
                .map_err(|err| db_err(&err))?;
            stmt.query_map(params![now.as_unix_millis(), limit], |row| row.get::<_, String>(0))
                .map_err(|err| db_err(&err))?
                .collect::<Result<Vec<String>, rusqlite::Error>>()
                .map_err(|err| db_err(&err))?
        };
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let changed = tx
                .execute(
                    "UPDATE dlq_entries SET status = 'RETRYING'
                     WHERE dlq_id = ?1 AND status = 'PENDING_RETRY'",
                    params![id],
                )
                .map_err(|err| db_err(&err))?;
            if changed == 0 {
                continue;
            }
            let doc: String = tx
                .query_row(
                    "SELECT doc FROM dlq_entries WHERE dlq_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(|err| db_err(&err))?;
            let mut entry: DlqEntry = decode_doc(&doc)?;
            entry.status = DlqStatus::Retrying;
            let updated = encode_doc(&entry)?;
            tx.execute(
                "UPDATE dlq_entries SET doc = ?1 WHERE dlq_id = ?2",
                params![updated, id],
            )
            .map_err(|err| db_err(&err))?;
            claimed.push(entry);
        }
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(claimed)
    }

    fn resolve_dlq(&self, dlq_id: &DlqId) -> Result<(), StoreError> {
        self.update_dlq_doc(dlq_id, |entry| entry.status = DlqStatus::Resolved)
    }

    fn reschedule_dlq(
        &self,
        dlq_id: &DlqId,
        retry_count: u32,
        next_retry_at: Timestamp,
        error: &DeliveryError,
    ) -> Result<(), StoreError> {
        self.update_dlq_doc(dlq_id, |entry| {
            entry.status = DlqStatus::PendingRetry;
            entry.retry_count = retry_count;
            entry.next_retry_at = next_retry_at;
            entry.error = error.clone();
        })
    }

    fn abandon_dlq(&self, dlq_id: &DlqId, notes: Option<&str>) -> Result<(), StoreError> {
        self.update_dlq_doc(dlq_id, |entry| {
            entry.status = DlqStatus::Abandoned;
            entry.notes = notes.map(ToString::to_string);
        })
    }

    fn delete_dlq(&self, dlq_id: &DlqId) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let removed = guard
            .execute("DELETE FROM dlq_entries WHERE dlq_id = ?1", params![dlq_id.as_str()])
            .map_err(|err| db_err(&err))?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("dlq entry {dlq_id} not found")));
        }
        Ok(())
    }

    fn force_retry_dlq(&self, dlq_id: &DlqId, now: Timestamp) -> Result<(), StoreError> {
        self.update_dlq_doc(dlq_id, |entry| {
            entry.status = DlqStatus::PendingRetry;
            entry.next_retry_at = now;
        })
    }

    fn dlq_entry(&self, dlq_id: &DlqId) -> Result<Option<DlqEntry>, StoreError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM dlq_entries WHERE dlq_id = ?1",
                params![dlq_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        doc.map(|doc| decode_doc(&doc)).transpose()
    }

    fn pending_dlq_count(&self, org_id: Option<OrgId>) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let count: i64 = match org_id {
            Some(org) => guard
                .query_row(
                    "SELECT COUNT(*) FROM dlq_entries
                     WHERE status = 'PENDING_RETRY' AND org_id = ?1",
                    params![org.as_i32()],
                    |row| row.get(0),
                )
                .map_err(|err| db_err(&err))?,
            None => guard
                .query_row(
                    "SELECT COUNT(*) FROM dlq_entries WHERE status = 'PENDING_RETRY'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|err| db_err(&err))?,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ============================================================================
// SECTION: Rate Limit Store
// ============================================================================

impl RateLimitStore for SqliteStateStore {
    fn increment_window(
        &self,
        integration_id: &IntegrationId,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<u32, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        tx.execute(
            "INSERT INTO rate_limit_windows (integration_id, window_start, window_end, count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(integration_id, window_start) DO UPDATE SET count = count + 1",
            params![
                integration_id.as_str(),
                window_start.as_unix_millis(),
                window_end.as_unix_millis()
            ],
        )
        .map_err(|err| db_err(&err))?;
        let count: i64 = tx
            .query_row(
                "SELECT count FROM rate_limit_windows
                 WHERE integration_id = ?1 AND window_start = ?2",
                params![integration_id.as_str(), window_start.as_unix_millis()],
                |row| row.get(0),
            )
            .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn purge_windows_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let removed = guard
            .execute(
                "DELETE FROM rate_limit_windows WHERE window_end <= ?1",
                params![cutoff.as_unix_millis()],
            )
            .map_err(|err| db_err(&err))?;
        Ok(u64::try_from(removed).unwrap_or(0))
    }
}

// ============================================================================
// SECTION: Pending Delivery Store
// ============================================================================

impl PendingDeliveryStore for SqliteStateStore {
    fn insert_pending(&self, delivery: &PendingDelivery) -> Result<(), StoreError> {
        let doc = encode_doc(delivery)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO pending_deliveries (id, org_id, status, scheduled_for, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    scheduled_for = excluded.scheduled_for,
                    doc = excluded.doc",
                params![
                    delivery.id.as_str(),
                    delivery.org_id.as_i32(),
                    delivery.status.as_str(),
                    delivery.scheduled_for.as_unix_millis(),
                    doc,
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn claim_due_pending(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<PendingDelivery>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let ids: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM pending_deliveries
                     WHERE status = 'PENDING' AND scheduled_for <= ?1
                     ORDER BY scheduled_for LIMIT ?2",
                )
                .map_err(|err| db_err(&err))?;
            stmt.query_map(params![now.as_unix_millis(), limit], |row| row.get::<_, String>(0))
                .map_err(|err| db_err(&err))?
                .collect::<Result<Vec<String>, rusqlite::Error>>()
                .map_err(|err| db_err(&err))?
        };
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let changed = tx
                .execute(
                    "UPDATE pending_deliveries SET status = 'RUNNING'
                     WHERE id = ?1 AND status = 'PENDING'",
                    params![id],
                )
                .map_err(|err| db_err(&err))?;
            if changed == 0 {
                continue;
            }
            let doc: String = tx
                .query_row(
                    "SELECT doc FROM pending_deliveries WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(|err| db_err(&err))?;
            let mut delivery: PendingDelivery = decode_doc(&doc)?;
            delivery.status = PendingStatus::Running;
            delivery.attempt = delivery.attempt.saturating_add(1);
            let updated = encode_doc(&delivery)?;
            tx.execute(
                "UPDATE pending_deliveries SET doc = ?1 WHERE id = ?2",
                params![updated, id],
            )
            .map_err(|err| db_err(&err))?;
            claimed.push(delivery);
        }
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(claimed)
    }

    fn finish_pending(&self, id: &DeliveryId, status: PendingStatus) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM pending_deliveries WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        let doc = doc
            .ok_or_else(|| StoreError::NotFound(format!("pending delivery {id} not found")))?;
        let mut delivery: PendingDelivery = decode_doc(&doc)?;
        delivery.status = status;
        let updated = encode_doc(&delivery)?;
        tx.execute(
            "UPDATE pending_deliveries SET doc = ?1, status = ?2 WHERE id = ?3",
            params![updated, status.as_str(), id.as_str()],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))
    }

    fn reschedule_pending(
        &self,
        id: &DeliveryId,
        scheduled_for: Timestamp,
        occurrences: u32,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM pending_deliveries WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        let doc = doc
            .ok_or_else(|| StoreError::NotFound(format!("pending delivery {id} not found")))?;
        let mut delivery: PendingDelivery = decode_doc(&doc)?;
        delivery.status = PendingStatus::Pending;
        delivery.scheduled_for = scheduled_for;
        delivery.occurrences = occurrences;
        let updated = encode_doc(&delivery)?;
        tx.execute(
            "UPDATE pending_deliveries SET doc = ?1, status = 'PENDING', scheduled_for = ?2
             WHERE id = ?3",
            params![updated, scheduled_for.as_unix_millis(), id.as_str()],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))
    }
}

// ============================================================================
// SECTION: Scheduled Job Store
// ============================================================================

impl ScheduledJobStore for SqliteStateStore {
    fn upsert_job(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        let doc = encode_doc(job)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO scheduled_jobs (job_id, org_id, is_active, next_run_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id) DO UPDATE SET
                    is_active = excluded.is_active,
                    next_run_at = excluded.next_run_at,
                    doc = excluded.doc",
                params![
                    job.job_id.as_str(),
                    job.org_id.as_i32(),
                    i64::from(job.is_active),
                    job.next_run_at.as_unix_millis(),
                    doc,
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn due_jobs(&self, now: Timestamp) -> Result<Vec<ScheduledJob>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT doc FROM scheduled_jobs
                 WHERE is_active = 1 AND next_run_at <= ?1
                 ORDER BY next_run_at",
            )
            .map_err(|err| db_err(&err))?;
        let docs = stmt
            .query_map(params![now.as_unix_millis()], |row| row.get::<_, String>(0))
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?;
        docs.iter().map(|doc| decode_doc(doc)).collect()
    }

    fn record_job_run(
        &self,
        job_id: &JobId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM scheduled_jobs WHERE job_id = ?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        let doc = doc.ok_or_else(|| StoreError::NotFound(format!("job {job_id} not found")))?;
        let mut job: ScheduledJob = decode_doc(&doc)?;
        job.last_run_at = Some(last_run_at);
        job.next_run_at = next_run_at;
        let updated = encode_doc(&job)?;
        tx.execute(
            "UPDATE scheduled_jobs SET doc = ?1, next_run_at = ?2 WHERE job_id = ?3",
            params![updated, next_run_at.as_unix_millis(), job_id.as_str()],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))
    }

    fn insert_job_log(&self, log: &ScheduledJobLog) -> Result<(), StoreError> {
        let doc = encode_doc(log)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO scheduled_job_logs (id, job_id, org_id, started_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    log.id,
                    log.job_id.as_str(),
                    log.org_id.as_i32(),
                    log.started_at.as_unix_millis(),
                    doc,
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn job(&self, job_id: &JobId) -> Result<Option<ScheduledJob>, StoreError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM scheduled_jobs WHERE job_id = ?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        doc.map(|doc| decode_doc(&doc)).transpose()
    }

    fn query_documents(
        &self,
        collection: &str,
        filter: &BTreeMap<String, serde_json::Value>,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let table = match collection {
            "execution_logs" => "execution_logs",
            "dlq_entries" => "dlq_entries",
            "pending_deliveries" => "pending_deliveries",
            "scheduled_job_logs" => "scheduled_job_logs",
            other => {
                return Err(StoreError::NotFound(format!("unknown collection: {other}")));
            }
        };
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(&format!("SELECT doc FROM {table} ORDER BY rowid"))
            .map_err(|err| db_err(&err))?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| db_err(&err))?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|err| db_err(&err))?;
        let mut matched = Vec::new();
        for doc in docs {
            let value: serde_json::Value = decode_doc(&doc)?;
            let keep =
                filter.iter().all(|(field, expected)| value.get(field) == Some(expected));
            if keep {
                matched.push(value);
                if matched.len() >= limit {
                    break;
                }
            }
        }
        Ok(matched)
    }
}

// ============================================================================
// SECTION: Lookup Store
// ============================================================================

impl LookupStore for SqliteStateStore {
    fn upsert_lookup_table(&self, table: &LookupTable) -> Result<(), StoreError> {
        let doc = encode_doc(table)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO lookups (org_id, name, doc, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(org_id, name) DO UPDATE SET
                    doc = excluded.doc,
                    updated_at = excluded.updated_at",
                params![
                    table.org_id.as_i32(),
                    table.name,
                    doc,
                    table.updated_at.as_unix_millis()
                ],
            )
            .map(|_| ())
            .map_err(|err| db_err(&err))
    }

    fn lookup_table(&self, org_id: OrgId, name: &str) -> Result<Option<LookupTable>, StoreError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM lookups WHERE org_id = ?1 AND name = ?2",
                params![org_id.as_i32(), name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        doc.map(|doc| decode_doc(&doc)).transpose()
    }

    fn record_lookup_usage(
        &self,
        org_id: OrgId,
        name: &str,
        hits: u64,
        misses: u64,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_err(&err))?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM lookups WHERE org_id = ?1 AND name = ?2",
                params![org_id.as_i32(), name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?;
        if let Some(doc) = doc {
            let mut table: LookupTable = decode_doc(&doc)?;
            table.hits = table.hits.saturating_add(hits);
            table.misses = table.misses.saturating_add(misses);
            let updated = encode_doc(&table)?;
            tx.execute(
                "UPDATE lookups SET doc = ?1 WHERE org_id = ?2 AND name = ?3",
                params![updated, org_id.as_i32(), name],
            )
            .map_err(|err| db_err(&err))?;
        }
        tx.commit().map_err(|err| db_err(&err))
    }
}

// ============================================================================
// SECTION: Connection Helpers
// ============================================================================

/// Ensures the parent directory of a database file exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str() == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

/// Opens a connection with the configured pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection =
        Connection::open(&config.path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(connection)
}

/// Creates or verifies the store schema.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);
         CREATE TABLE IF NOT EXISTS integration_configs (
            org_id INTEGER NOT NULL,
            integration_id TEXT NOT NULL,
            integration_name TEXT NOT NULL,
            direction TEXT NOT NULL,
            event_type TEXT NOT NULL,
            is_active INTEGER NOT NULL,
            is_default INTEGER NOT NULL,
            doc TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (org_id, integration_id)
         );
         CREATE INDEX IF NOT EXISTS idx_integrations_match
            ON integration_configs (org_id, direction, is_active, event_type);
         CREATE TABLE IF NOT EXISTS org_versions (
            org_id INTEGER PRIMARY KEY,
            version INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS event_sources (
            org_id INTEGER PRIMARY KEY,
            is_active INTEGER NOT NULL,
            doc TEXT NOT NULL,
            updated_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS source_checkpoints (
            org_id INTEGER NOT NULL,
            source_type TEXT NOT NULL,
            doc TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (org_id, source_type)
         );
         CREATE TABLE IF NOT EXISTS execution_logs (
            trace_id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL,
            integration_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_logs_recent
            ON execution_logs (org_id, started_at DESC);
         CREATE INDEX IF NOT EXISTS idx_logs_idempotency
            ON execution_logs (org_id, fingerprint, integration_id, status);
         CREATE TABLE IF NOT EXISTS dlq_entries (
            dlq_id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            next_retry_at INTEGER NOT NULL,
            doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_dlq_due
            ON dlq_entries (status, next_retry_at);
         CREATE INDEX IF NOT EXISTS idx_dlq_org
            ON dlq_entries (org_id, status, next_retry_at);
         CREATE TABLE IF NOT EXISTS rate_limit_windows (
            integration_id TEXT NOT NULL,
            window_start INTEGER NOT NULL,
            window_end INTEGER NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY (integration_id, window_start)
         );
         CREATE TABLE IF NOT EXISTS pending_deliveries (
            id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            scheduled_for INTEGER NOT NULL,
            doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_pending_due
            ON pending_deliveries (status, scheduled_for);
         CREATE TABLE IF NOT EXISTS scheduled_jobs (
            job_id TEXT PRIMARY KEY,
            org_id INTEGER NOT NULL,
            is_active INTEGER NOT NULL,
            next_run_at INTEGER NOT NULL,
            doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_jobs_due
            ON scheduled_jobs (is_active, next_run_at);
         CREATE TABLE IF NOT EXISTS scheduled_job_logs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            org_id INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_job_logs_recent
            ON scheduled_job_logs (org_id, started_at DESC);
         CREATE TABLE IF NOT EXISTS lookups (
            org_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            doc TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (org_id, name)
         );",
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::Invalid(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}
