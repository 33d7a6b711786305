// crates/relay-gate-sources/src/polling_sql.rs
// ============================================================================
// Module: Polling SQL Source
// Description: Polls a tenant table for rows past the committed checkpoint.
// Purpose: Produce normalized events from relational tenant data.
// Dependencies: relay-gate-core, rusqlite, async-trait, serde_json
// ============================================================================

//! ## Overview
//! Each poll cycle runs `SELECT … WHERE id > :checkpoint ORDER BY id LIMIT
//! :batch` against the tenant database through a bounded per-org connection
//! pool. Column names come from the configured mapping discovered at setup
//! time. The in-memory cursor only moves on `commit`, so an uncommitted
//! batch is re-read after a crash (at-least-once; the execution-log
//! fingerprint deduplicates downstream). Corrupt rows are skipped with a
//! `skip_category` audit event and are covered by the batch checkpoint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relay_gate_core::EntityRid;
use relay_gate_core::MetricEvent;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::OrgId;
use relay_gate_core::PollingSqlSourceConfig;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::SourceType;
use relay_gate_core::event::MAX_DB_TIMEOUT_MS;
use relay_gate_core::event::MAX_POLL_INTERVAL_MS;
use relay_gate_core::event::MAX_SOURCE_BATCH_SIZE;
use relay_gate_core::event::MAX_SOURCE_CONNECTIONS;
use relay_gate_core::event::MIN_DB_TIMEOUT_MS;
use relay_gate_core::event::MIN_POLL_INTERVAL_MS;
use relay_gate_core::event::MIN_SOURCE_BATCH_SIZE;
use relay_gate_core::event::MIN_SOURCE_CONNECTIONS;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::SourceBatch;
use relay_gate_core::interfaces::SourceError;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::Clock;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde_json::Value;

// ============================================================================
// SECTION: Connection Pool
// ============================================================================

/// Bounded checkout pool of tenant-database connections.
struct TenantPool {
    /// Idle connections available for checkout.
    idle: Mutex<Vec<Connection>>,
}

impl TenantPool {
    /// Opens `limit` read-only connections with the statement timeout set.
    fn open(
        config: &PollingSqlSourceConfig,
        limit: u32,
        timeout_ms: u64,
    ) -> Result<Self, SourceError> {
        let mut idle = Vec::new();
        for _ in 0..limit {
            let connection = Connection::open_with_flags(
                &config.database_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|err| SourceError::Transient(format!("tenant db open failed: {err}")))?;
            connection
                .busy_timeout(Duration::from_millis(timeout_ms))
                .map_err(|err| SourceError::Transient(format!("tenant db setup failed: {err}")))?;
            idle.push(connection);
        }
        Ok(Self {
            idle: Mutex::new(idle),
        })
    }

    /// Checks out one connection; fails when the pool is poisoned or empty.
    fn checkout(&self) -> Result<Connection, SourceError> {
        let mut idle = self
            .idle
            .lock()
            .map_err(|_| SourceError::Fatal("tenant pool mutex poisoned".to_string()))?;
        idle.pop().ok_or_else(|| SourceError::Transient("tenant pool exhausted".to_string()))
    }

    /// Returns a connection to the pool.
    fn put_back(&self, connection: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(connection);
        }
    }
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// Polling-SQL event source for one org.
pub struct PollingSqlSource {
    /// Owning organization.
    org_id: OrgId,
    /// Clamped adapter configuration.
    config: PollingSqlSourceConfig,
    /// Tenant connection pool, built on `start`.
    pool: Option<TenantPool>,
    /// Last committed row id; batches read past this cursor.
    cursor: i64,
    /// State store holding the durable checkpoint.
    store: Arc<dyn StateStore>,
    /// Clock for `produced_at` stamps.
    clock: Arc<dyn Clock>,
    /// System log sink for skip warnings.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink for skip counters.
    metrics: Arc<dyn GatewayMetrics>,
}

impl PollingSqlSource {
    /// Creates an adapter, clamping every numeric knob into its range.
    #[must_use]
    pub fn new(
        org_id: OrgId,
        mut config: PollingSqlSourceConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        metrics: Arc<dyn GatewayMetrics>,
    ) -> Self {
        config.poll_interval_ms =
            config.poll_interval_ms.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        config.batch_size = config.batch_size.clamp(MIN_SOURCE_BATCH_SIZE, MAX_SOURCE_BATCH_SIZE);
        config.db_timeout_ms = config.db_timeout_ms.clamp(MIN_DB_TIMEOUT_MS, MAX_DB_TIMEOUT_MS);
        config.connection_limit =
            config.connection_limit.clamp(MIN_SOURCE_CONNECTIONS, MAX_SOURCE_CONNECTIONS);
        Self {
            org_id,
            config,
            pool: None,
            cursor: 0,
            store,
            clock,
            system_log,
            metrics,
        }
    }

    /// Returns the clamped poll interval for the supervisor's tick loop.
    #[must_use]
    pub const fn poll_interval_ms(&self) -> u64 {
        self.config.poll_interval_ms
    }

    /// Maps one tenant row into a normalized event.
    fn build_event(&self, row_id: i64, event_type: String, entity_rid: Option<String>, payload: &str)
    -> Result<NormalizedEvent, SourceError> {
        let payload: Value = serde_json::from_str(payload).map_err(|err| SourceError::Corrupt {
            skip_category: "payload_parse".to_string(),
            message: format!("row {row_id}: {err}"),
        })?;
        let source_event_id = row_id.to_string();
        let fingerprint = event_fingerprint(self.org_id, SourceType::PollingSql.as_str(), &source_event_id)
            .map_err(|err| SourceError::Fatal(format!("fingerprint failure: {err}")))?;
        Ok(NormalizedEvent {
            org_id: self.org_id,
            event_type,
            entity_rid: entity_rid.map(EntityRid::new),
            payload,
            source_event_id,
            produced_at: self.clock.now(),
            fingerprint,
        })
    }

    /// Emits a skip warning for one corrupt row.
    fn warn_skip(&self, row_id: i64, skip_category: &str, message: &str) {
        self.system_log.log(&SystemEvent {
            level: LogLevel::Warn,
            component: "polling_sql".to_string(),
            message: format!("skipped corrupt row {row_id}: {message}"),
            org_id: Some(self.org_id),
            metadata: serde_json::json!({ "skip_category": skip_category }),
        });
        self.metrics.record(&MetricEvent::SourceRecordSkipped {
            org_id: self.org_id,
            skip_category: skip_category.to_string(),
        });
    }
}

/// Raw row data fetched before normalization.
struct FetchedRow {
    /// Monotonic row id.
    row_id: i64,
    /// Event type column value.
    event_type: String,
    /// Optional entity column value.
    entity_rid: Option<String>,
    /// Raw payload column text.
    payload: String,
}

#[async_trait]
impl EventSource for PollingSqlSource {
    fn org_id(&self) -> OrgId {
        self.org_id
    }

    fn source_type(&self) -> SourceType {
        SourceType::PollingSql
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        let checkpoint = self
            .store
            .checkpoint(self.org_id, SourceType::PollingSql)
            .map_err(|err| SourceError::Transient(format!("checkpoint load failed: {err}")))?;
        self.cursor = match checkpoint {
            Some(SourceCheckpoint::RowId {
                last_row_id,
            }) => last_row_id,
            Some(SourceCheckpoint::StreamOffsets {
                ..
            }) => {
                return Err(SourceError::Fatal(
                    "polling-sql source found a stream checkpoint".to_string(),
                ));
            }
            None => 0,
        };
        self.pool = Some(TenantPool::open(
            &self.config,
            self.config.connection_limit,
            self.config.db_timeout_ms,
        )?);
        Ok(())
    }

    async fn stop(&mut self) {
        self.pool = None;
    }

    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| SourceError::Fatal("polling-sql source not started".to_string()))?;
        let connection = pool.checkout()?;
        let result = fetch_rows(&connection, &self.config, self.cursor);
        pool.put_back(connection);
        let rows = result?;

        let mut events = Vec::with_capacity(rows.len());
        let mut max_row_id = self.cursor;
        for row in rows {
            max_row_id = max_row_id.max(row.row_id);
            match self.build_event(row.row_id, row.event_type, row.entity_rid, &row.payload) {
                Ok(event) => events.push(event),
                Err(SourceError::Corrupt {
                    skip_category,
                    message,
                }) => self.warn_skip(row.row_id, &skip_category, &message),
                Err(other) => return Err(other),
            }
        }
        let checkpoint = (max_row_id > self.cursor).then_some(SourceCheckpoint::RowId {
            last_row_id: max_row_id,
        });
        Ok(SourceBatch {
            events,
            checkpoint,
        })
    }

    async fn commit(&mut self, checkpoint: &SourceCheckpoint) -> Result<(), SourceError> {
        self.store
            .advance_checkpoint(self.org_id, SourceType::PollingSql, checkpoint)
            .map_err(|err| SourceError::Transient(format!("checkpoint commit failed: {err}")))?;
        if let SourceCheckpoint::RowId {
            last_row_id,
        } = checkpoint
        {
            self.cursor = *last_row_id;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Row Fetch
// ============================================================================

/// Fetches rows past the cursor using the configured column mapping.
fn fetch_rows(
    connection: &Connection,
    config: &PollingSqlSourceConfig,
    cursor: i64,
) -> Result<Vec<FetchedRow>, SourceError> {
    let columns = &config.columns;
    let entity_select = columns
        .entity_rid
        .as_deref()
        .map_or_else(|| "NULL".to_string(), |column| format!("\"{column}\""));
    let query = format!(
        "SELECT \"{id}\", \"{event_type}\", {entity_select}, \"{payload}\" FROM \"{table}\" \
         WHERE \"{id}\" > ?1 ORDER BY \"{id}\" LIMIT ?2",
        id = columns.id,
        event_type = columns.event_type,
        payload = columns.payload,
        table = config.table,
    );
    let mut stmt = connection
        .prepare(&query)
        .map_err(|err| SourceError::Transient(format!("tenant query prepare failed: {err}")))?;
    let rows = stmt
        .query_map(rusqlite::params![cursor, i64::from(config.batch_size)], |row| {
            Ok(FetchedRow {
                row_id: row.get(0)?,
                event_type: row.get(1)?,
                entity_rid: row.get(2)?,
                payload: row.get(3)?,
            })
        })
        .map_err(|err| SourceError::Transient(format!("tenant query failed: {err}")))?
        .collect::<Result<Vec<FetchedRow>, rusqlite::Error>>()
        .map_err(|err| SourceError::Transient(format!("tenant row read failed: {err}")))?;
    Ok(rows)
}
