// crates/relay-gate-workers/src/jobs.rs
// ============================================================================
// Module: Scheduled Job Worker
// Description: CRON/INTERVAL fetch-transform-deliver pipelines.
// Purpose: Run due jobs against their data sources and record run logs.
// Dependencies: relay-gate-core, chrono, chrono-tz, cron, rusqlite, tokio
// ============================================================================

//! ## Overview
//! Each tick finds active jobs with `next_run_at <= now` and runs the
//! three-stage pipeline: data-source fetch under a hard budget (SQL query,
//! document-store filter, or internal HTTP call), transformation with the
//! fetched records as `payload.data`, and delivery to the job's target.
//! Every run appends a [`ScheduledJobLog`] including a secret-redacted,
//! reproducible curl command. The next occurrence is computed from the CRON
//! expression in the job's timezone or from the interval; missed windows
//! are skipped, never replayed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use chrono_tz::Tz;
use relay_gate_core::CapturedRequest;
use relay_gate_core::Clock;
use relay_gate_core::DeliveryError;
use relay_gate_core::ErrorCategory;
use relay_gate_core::IntegrationId;
use relay_gate_core::JobDataSource;
use relay_gate_core::JobRunStatus;
use relay_gate_core::JobTrigger;
use relay_gate_core::MetricEvent;
use relay_gate_core::ScheduledJob;
use relay_gate_core::ScheduledJobLog;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::AuthHeaderBuilder;
use relay_gate_core::interfaces::DispatchOutcome;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::OutboundRequest;
use relay_gate_core::interfaces::RequestDispatcher;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::StoreError;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use relay_gate_core::mask_headers;
use relay_gate_core::random_id;
use relay_gate_core::runtime::TransformContext;
use relay_gate_core::runtime::TransformError;
use relay_gate_core::runtime::TransformExecutor;
use relay_gate_core::runtime::substitute_variables;
use relay_gate_core::truncate_body_at;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Truncation bound for fetched-data and payload snapshots in job logs.
const JOB_LOG_SNIPPET_BYTES: usize = 16 * 1024;
/// Upper bound of records fetched per run.
const MAX_FETCHED_RECORDS: usize = 10_000;
/// Fallback spacing when a job's schedule fails to evaluate.
const BROKEN_SCHEDULE_RETRY_MS: i64 = 3_600_000;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Scheduled-job worker tuning.
#[derive(Debug, Clone)]
pub struct JobWorkerSettings {
    /// Tick interval in milliseconds.
    pub interval_ms: u64,
    /// Hard budget for one data-source fetch, in milliseconds.
    pub fetch_budget_ms: u64,
    /// Allowlisted environment snapshot for substitution.
    pub env: BTreeMap<String, String>,
}

/// Scheduled-job worker errors.
#[derive(Debug, Error)]
pub enum JobWorkerError {
    /// State store failure (category `INTERNAL`).
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Schedule evaluation errors.
#[derive(Debug, Error)]
pub enum JobScheduleError {
    /// CRON expression failed to parse.
    #[error("invalid cron expression: {0}")]
    Expression(String),
    /// Timezone name is unknown.
    #[error("unknown timezone: {0}")]
    Timezone(String),
    /// No future occurrence exists.
    #[error("schedule has no future occurrence")]
    Exhausted,
}

// ============================================================================
// SECTION: Schedule Evaluation
// ============================================================================

/// Computes the next run strictly after `after` for a job trigger.
///
/// Five-field CRON expressions gain a leading seconds field; evaluation
/// happens in the job's named timezone. Interval triggers advance from
/// `after`, so missed windows collapse into one next occurrence.
///
/// # Errors
///
/// Returns [`JobScheduleError`] for unparseable expressions or timezones.
pub fn next_run_after(trigger: &JobTrigger, after: Timestamp) -> Result<Timestamp, JobScheduleError> {
    match trigger {
        JobTrigger::Interval {
            interval_ms,
        } => {
            let interval = i64::try_from(*interval_ms).unwrap_or(i64::MAX).max(1);
            Ok(after.saturating_add_millis(interval))
        }
        JobTrigger::Cron {
            expression,
            timezone,
        } => {
            let normalized = normalize_cron(expression);
            let schedule = cron::Schedule::from_str(&normalized)
                .map_err(|err| JobScheduleError::Expression(err.to_string()))?;
            let tz: Tz = timezone
                .parse()
                .map_err(|_| JobScheduleError::Timezone(timezone.clone()))?;
            let after_dt = tz
                .timestamp_millis_opt(after.as_unix_millis())
                .single()
                .ok_or_else(|| JobScheduleError::Timezone(timezone.clone()))?;
            let next = schedule.after(&after_dt).next().ok_or(JobScheduleError::Exhausted)?;
            Ok(Timestamp::from_unix_millis(next.timestamp_millis()))
        }
    }
}

/// Prepends a seconds field to five-field CRON expressions.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// CRON/INTERVAL scheduled-job worker.
pub struct ScheduledJobWorker {
    /// State store.
    store: Arc<dyn StateStore>,
    /// Outbound HTTP seam shared with the delivery pipeline.
    dispatcher: Arc<dyn RequestDispatcher>,
    /// Outgoing-auth builder.
    auth: Arc<dyn AuthHeaderBuilder>,
    /// Transformation executor.
    transforms: Arc<TransformExecutor>,
    /// Clock.
    clock: Arc<dyn Clock>,
    /// System log.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Tuning.
    settings: JobWorkerSettings,
}

impl ScheduledJobWorker {
    /// Creates a scheduled-job worker.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        dispatcher: Arc<dyn RequestDispatcher>,
        auth: Arc<dyn AuthHeaderBuilder>,
        transforms: Arc<TransformExecutor>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        metrics: Arc<dyn GatewayMetrics>,
        settings: JobWorkerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            auth,
            transforms,
            clock,
            system_log,
            metrics,
            settings,
        }
    }

    /// Runs the worker loop until shutdown.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        heartbeat: &watch::Sender<Timestamp>,
    ) -> Result<(), JobWorkerError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await?;
            let _ = heartbeat.send(self.clock.now());
            self.metrics.record(&MetricEvent::WorkerTick {
                worker: "jobs",
            });
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.settings.interval_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }
        Ok(())
    }

    /// Runs every due job once.
    ///
    /// # Errors
    ///
    /// Returns [`JobWorkerError`] on store failures.
    pub async fn tick(&self) -> Result<usize, JobWorkerError> {
        let now = self.clock.now();
        let due = self.store.due_jobs(now)?;
        let count = due.len();
        for job in due {
            let log = self.run_job(&job).await;
            if let Err(err) = self.store.insert_job_log(&log) {
                self.warn(&job, &format!("job log write failed: {err}"));
            }
            let ran_at = self.clock.now();
            let next_run = next_run_after(&job.trigger, ran_at).unwrap_or_else(|err| {
                self.warn(&job, &format!("schedule evaluation failed: {err}"));
                ran_at.saturating_add_millis(BROKEN_SCHEDULE_RETRY_MS)
            });
            self.store.record_job_run(&job.job_id, ran_at, next_run)?;
        }
        Ok(count)
    }

    /// Runs one job pipeline and builds its run log.
    async fn run_job(&self, job: &ScheduledJob) -> ScheduledJobLog {
        let started_at = self.clock.now();
        let mut log = ScheduledJobLog {
            id: random_id("jobrun"),
            job_id: job.job_id.clone(),
            org_id: job.org_id,
            status: JobRunStatus::Failed,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            records_fetched: 0,
            data_fetched: String::new(),
            transformed_payload: String::new(),
            http_request: None,
            response_status: None,
            response_headers: BTreeMap::new(),
            response_body: None,
            curl_command: None,
            error: None,
        };
        let ctx = TransformContext {
            org_id: job.org_id,
            now: started_at,
            env: self.settings.env.clone(),
        };

        let outcome = self.execute_stages(job, &ctx, &mut log).await;
        if let Err(error) = outcome {
            log.error = Some(error);
            log.status = JobRunStatus::Failed;
        }
        let finished_at = self.clock.now();
        log.finished_at = finished_at;
        log.duration_ms = u64::try_from(finished_at.millis_since(started_at).max(0)).unwrap_or(0);
        log
    }

    /// Fetch, transform, and deliver; fills the log as stages complete.
    async fn execute_stages(
        &self,
        job: &ScheduledJob,
        ctx: &TransformContext,
        log: &mut ScheduledJobLog,
    ) -> Result<(), DeliveryError> {
        // Fetch under the hard budget.
        let budget = Duration::from_millis(self.settings.fetch_budget_ms);
        let records = tokio::time::timeout(budget, self.fetch(job, ctx))
            .await
            .map_err(|_| {
                DeliveryError::new(
                    ErrorCategory::Timeout,
                    "fetch_budget",
                    "data source fetch exceeded its budget",
                )
            })??;
        log.records_fetched = u64::try_from(records.len()).unwrap_or(u64::MAX);
        log.data_fetched = truncate_body_at(
            &serde_json::to_string(&records).unwrap_or_default(),
            JOB_LOG_SNIPPET_BYTES,
        );

        // Transform with the records as `payload.data`.
        let payload = json!({ "data": records });
        let transformed = self
            .transforms
            .apply(&job.transformation, &payload, ctx)
            .map_err(TransformError::into_delivery_error)?;
        let body = serde_json::to_string(&transformed).unwrap_or_default();
        log.transformed_payload = truncate_body_at(&body, JOB_LOG_SNIPPET_BYTES);

        // Deliver.
        let auth_headers = self.auth.build(job.org_id, &job_integration_id(job), &job.auth).await?;
        let mut headers = job.headers.clone();
        headers.extend(auth_headers);
        let request = OutboundRequest {
            method: job.http_method,
            url: job.target_url.clone(),
            headers: headers.clone(),
            body: job.http_method.has_body().then(|| body.clone()),
            timeout_ms: job.timeout_ms.clamp(1_000, 120_000),
        };
        let masked = mask_headers(&headers, &[]);
        log.http_request = Some(CapturedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: masked.clone(),
            body: request.body.clone().map(|body| truncate_body_at(&body, JOB_LOG_SNIPPET_BYTES)),
        });
        log.curl_command = Some(build_curl_command(
            job.http_method.as_str(),
            &request.url,
            &masked,
            request.body.as_deref(),
        ));

        match self.dispatcher.dispatch(&request).await {
            DispatchOutcome::Success(response) => {
                log.response_status = Some(response.status);
                log.response_headers = response.headers;
                log.response_body = Some(response.body);
                log.status = JobRunStatus::Success;
                Ok(())
            }
            DispatchOutcome::Failure {
                error,
                response,
                ..
            } => {
                if let Some(response) = response {
                    log.response_status = Some(response.status);
                    log.response_headers = response.headers;
                    log.response_body = Some(response.body);
                }
                Err(error)
            }
        }
    }

    /// Executes the job's data-source fetch.
    async fn fetch(
        &self,
        job: &ScheduledJob,
        ctx: &TransformContext,
    ) -> Result<Vec<Value>, DeliveryError> {
        match &job.data_source {
            JobDataSource::Sql {
                database_path,
                query,
            } => {
                let query = substitute_variables(query, ctx).map_err(|err| {
                    DeliveryError::new(
                        ErrorCategory::Transformation,
                        "query_substitution",
                        err.to_string(),
                    )
                })?;
                let database_path = database_path.clone();
                tokio::task::spawn_blocking(move || fetch_sql_rows(&database_path, &query))
                    .await
                    .map_err(|err| {
                        DeliveryError::new(
                            ErrorCategory::Internal,
                            "fetch_task",
                            format!("sql fetch task failed: {err}"),
                        )
                    })?
            }
            JobDataSource::DocumentQuery {
                collection,
                filter,
            } => self
                .store
                .query_documents(collection, filter, MAX_FETCHED_RECORDS)
                .map_err(|err| {
                    DeliveryError::new(ErrorCategory::Internal, "document_query", err.to_string())
                }),
            JobDataSource::InternalApi {
                url,
                method,
            } => {
                let url = substitute_variables(url, ctx).map_err(|err| {
                    DeliveryError::new(
                        ErrorCategory::Transformation,
                        "url_substitution",
                        err.to_string(),
                    )
                })?;
                let request = OutboundRequest {
                    method: *method,
                    url,
                    headers: BTreeMap::new(),
                    body: None,
                    timeout_ms: self.settings.fetch_budget_ms,
                };
                match self.dispatcher.dispatch(&request).await {
                    DispatchOutcome::Success(response) => {
                        let parsed: Value =
                            serde_json::from_str(&response.body).map_err(|err| {
                                DeliveryError::new(
                                    ErrorCategory::Validation,
                                    "fetch_parse",
                                    format!("internal api response is not json: {err}"),
                                )
                            })?;
                        Ok(match parsed {
                            Value::Array(items) => items,
                            other => vec![other],
                        })
                    }
                    DispatchOutcome::Failure {
                        error, ..
                    } => Err(error),
                }
            }
        }
    }

    /// Emits one warning system event for a job.
    fn warn(&self, job: &ScheduledJob, message: &str) {
        self.system_log.log(&SystemEvent {
            level: LogLevel::Warn,
            component: "job_worker".to_string(),
            message: message.to_string(),
            org_id: Some(job.org_id),
            metadata: json!({ "job_id": job.job_id.as_str() }),
        });
    }
}

/// Integration identity used for the job's OAuth2 token cache key.
fn job_integration_id(job: &ScheduledJob) -> IntegrationId {
    IntegrationId::new(format!("job:{}", job.job_id))
}

// ============================================================================
// SECTION: SQL Fetch
// ============================================================================

/// Runs one read-only query, mapping rows to JSON objects by column name.
fn fetch_sql_rows(database_path: &str, query: &str) -> Result<Vec<Value>, DeliveryError> {
    let connection = rusqlite::Connection::open_with_flags(
        database_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| {
        DeliveryError::new(
            ErrorCategory::Network,
            "fetch_connect",
            format!("data source unreachable: {err}"),
        )
    })?;
    let mut stmt = connection.prepare(query).map_err(|err| {
        DeliveryError::new(
            ErrorCategory::Validation,
            "fetch_query",
            format!("data source query failed: {err}"),
        )
    })?;
    let column_names: Vec<String> =
        stmt.column_names().iter().map(ToString::to_string).collect();
    let rows = stmt
        .query_map([], |row| {
            let mut object = serde_json::Map::with_capacity(column_names.len());
            for (index, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(index)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(value) => Value::from(value),
                    rusqlite::types::ValueRef::Real(value) => Value::from(value),
                    rusqlite::types::ValueRef::Text(text) => {
                        Value::String(String::from_utf8_lossy(text).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(blob) => {
                        Value::String(format!("<{} bytes>", blob.len()))
                    }
                };
                object.insert(name.clone(), value);
            }
            Ok(Value::Object(object))
        })
        .map_err(|err| {
            DeliveryError::new(
                ErrorCategory::Validation,
                "fetch_query",
                format!("data source query failed: {err}"),
            )
        })?
        .collect::<Result<Vec<Value>, rusqlite::Error>>()
        .map_err(|err| {
            DeliveryError::new(
                ErrorCategory::Validation,
                "fetch_rows",
                format!("data source row read failed: {err}"),
            )
        })?;
    Ok(rows.into_iter().take(MAX_FETCHED_RECORDS).collect())
}

// ============================================================================
// SECTION: Curl Rendering
// ============================================================================

/// Renders a reproducible curl command with masked headers.
#[must_use]
pub fn build_curl_command(
    method: &str,
    url: &str,
    masked_headers: &BTreeMap<String, String>,
    body: Option<&str>,
) -> String {
    let mut command = format!("curl -X {method} '{url}'");
    for (name, value) in masked_headers {
        command.push_str(&format!(" -H '{name}: {value}'"));
    }
    if let Some(body) = body {
        let escaped = body.replace('\'', "'\\''");
        command.push_str(&format!(" -d '{escaped}'"));
    }
    command
}
