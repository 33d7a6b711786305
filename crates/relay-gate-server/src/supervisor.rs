// crates/relay-gate-server/src/supervisor.rs
// ============================================================================
// Module: Process Supervisor
// Description: Store connection, adapter registry, worker lifecycle.
// Purpose: Start, supervise, reload, and drain the gateway process.
// Dependencies: relay-gate-{config,core,delivery,sources,store-sqlite,workers}
// ============================================================================

//! ## Overview
//! Startup order: connect the state store, build per-org adapters from the
//! persisted event-source configs, spawn the enabled workers, and serve the
//! HTTP surface. Crashed workers restart with exponential backoff; the
//! restart counter resets after a sustained healthy run. A reload watcher
//! polls the event-source configs and restarts the delivery worker with
//! fresh adapters when a tenant's configuration changes. On SIGTERM the
//! shutdown flag flips, workers drain within a bounded deadline, and the
//! process exits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use relay_gate_config::GatewayConfig;
use relay_gate_core::Clock;
use relay_gate_core::NoScriptEvaluator;
use relay_gate_core::NoopMetrics;
use relay_gate_core::OrgId;
use relay_gate_core::SourceKind;
use relay_gate_core::SystemClock;
use relay_gate_core::Timestamp;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use relay_gate_core::runtime::MatcherCache;
use relay_gate_core::runtime::MemoryStateStore;
use relay_gate_core::runtime::TransformExecutor;
use relay_gate_core::runtime::exponential_delay_ms;
use relay_gate_delivery::AuthBuilder;
use relay_gate_delivery::DelivererConfig;
use relay_gate_delivery::HttpDeliverer;
use relay_gate_sources::ChannelConsumer;
use relay_gate_sources::PollingSqlSource;
use relay_gate_sources::PushIntake;
use relay_gate_sources::StreamSource;
use relay_gate_sources::push_queue;
use relay_gate_store_sqlite::SqliteStateStore;
use relay_gate_store_sqlite::SqliteStoreConfig;
use relay_gate_workers::AlertCenter;
use relay_gate_workers::DeliveryPipeline;
use relay_gate_workers::DeliveryWorker;
use relay_gate_workers::DeliveryWorkerSettings;
use relay_gate_workers::DlqWorker;
use relay_gate_workers::DlqWorkerSettings;
use relay_gate_workers::ExecutionLogWriter;
use relay_gate_workers::JobWorkerSettings;
use relay_gate_workers::PipelineDeps;
use relay_gate_workers::PipelineSettings;
use relay_gate_workers::ScheduledJobWorker;
use relay_gate_workers::SchedulerWorker;
use relay_gate_workers::SchedulerWorkerSettings;
use relay_gate_workers::StoreLookupResolver;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::health::HealthRegistry;
use crate::http::AppState;
use crate::http::PushRegistry;
use crate::http::build_router;
use crate::sinks::StderrAlertSink;
use crate::sinks::StderrSystemLog;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capacity of each per-org push queue.
const PUSH_QUEUE_CAPACITY: usize = 256;
/// Default per-source batch size handed to stream adapters.
const STREAM_BATCH_SIZE: usize = 100;
/// Poll spacing for the adapter reload watcher.
const RELOAD_POLL_MS: u64 = 30_000;
/// Restart backoff cap for crashed workers.
const RESTART_CAP_MS: u64 = 60_000;
/// Healthy run length that resets the restart counter.
const RESTART_RESET: Duration = Duration::from_secs(300);
/// Drain deadline after shutdown is requested.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// State store connection or initialization failure.
    #[error("state store init failure: {0}")]
    Store(String),
    /// Component initialization failure.
    #[error("initialization failure: {0}")]
    Init(String),
    /// Listener binding failure.
    #[error("listen failure: {0}")]
    Listen(String),
}

// ============================================================================
// SECTION: Supervisor
// ============================================================================

/// Process supervisor owning the shared dependencies.
pub struct Supervisor {
    /// Validated process configuration.
    config: GatewayConfig,
    /// Connected state store.
    store: Arc<dyn StateStore>,
    /// Shared clock.
    clock: Arc<dyn Clock>,
    /// System log sink.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Shared pipeline.
    pipeline: Arc<DeliveryPipeline>,
    /// Trace writer (shared with the DLQ worker).
    writer: Arc<ExecutionLogWriter>,
    /// Alert center.
    alerts: Arc<AlertCenter>,
    /// Transform executor shared with the job worker.
    transforms: Arc<TransformExecutor>,
    /// Outbound HTTP deliverer.
    dispatcher: Arc<HttpDeliverer>,
    /// Outgoing-auth builder.
    auth: Arc<AuthBuilder>,
    /// Push intakes served by the router.
    push_registry: Arc<PushRegistry>,
    /// Shutdown flag flipped on termination; workers and in-flight
    /// deliveries observe it.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Shutdown receiver cloned into every worker.
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    /// Connects the store and wires the shared dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when the store or HTTP stack cannot be
    /// initialized.
    pub fn build(config: GatewayConfig) -> Result<Self, SupervisorError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let system_log: Arc<dyn SystemLogSink> = Arc::new(StderrSystemLog);
        let metrics: Arc<dyn GatewayMetrics> = Arc::new(NoopMetrics);
        let store = connect_store(&config)?;
        let alerts = Arc::new(AlertCenter::new(
            Arc::new(StderrAlertSink),
            config.alerts.clone(),
        ));
        let writer = Arc::new(ExecutionLogWriter::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&system_log),
            push_secret_headers(store.as_ref()),
        ));
        let transforms = Arc::new(TransformExecutor::new(
            Arc::new(NoScriptEvaluator),
            Arc::new(StoreLookupResolver::new(Arc::clone(&store))),
        ));
        let dispatcher = Arc::new(HttpDeliverer::new(DelivererConfig {
            enforce_https: config.security.enforce_https,
            block_private_networks: config.security.block_private_networks,
            user_agent: "relay-gate/0.1".to_string(),
        }));
        let auth = Arc::new(
            AuthBuilder::new(Arc::clone(&clock))
                .map_err(|err| SupervisorError::Init(err.to_string()))?,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let pipeline = Arc::new(DeliveryPipeline::new(
            PipelineDeps {
                store: Arc::clone(&store),
                dispatcher: Arc::clone(&dispatcher) as Arc<dyn relay_gate_core::RequestDispatcher>,
                auth: Arc::clone(&auth) as Arc<dyn relay_gate_core::AuthHeaderBuilder>,
                transforms: Arc::clone(&transforms),
                writer: Arc::clone(&writer),
                clock: Arc::clone(&clock),
                metrics: Arc::clone(&metrics),
                alerts: Arc::clone(&alerts),
                cancel: shutdown_rx.clone(),
            },
            PipelineSettings {
                dlq_max_retries: config.worker.dlq.max_retries,
                default_multi_action_delay_ms: config.worker.multi_action_delay_ms,
                retry_base_ms: 1_000,
                env: config.env_snapshot(),
            },
        ));
        Ok(Self {
            config,
            store,
            clock,
            system_log,
            metrics,
            pipeline,
            writer,
            alerts,
            transforms,
            dispatcher,
            auth,
            push_registry: Arc::new(PushRegistry::new()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Runs the process until SIGTERM/ctrl-c, then drains.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when the listener cannot be bound.
    pub async fn serve(self) -> Result<(), SupervisorError> {
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let shutdown_rx = self.shutdown_rx.clone();
        let (reload_tx, reload_rx) = watch::channel(0_u64);
        let mut health = HealthRegistry::new(Arc::clone(&self.clock));

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        if self.config.worker.enabled {
            let heartbeat = health.register("delivery", self.config.worker.interval_ms);
            handles.push(self.spawn_delivery(shutdown_rx.clone(), reload_rx, heartbeat));
        }
        if self.config.scheduler.enabled {
            let heartbeat = health.register("scheduler", self.config.scheduler.interval_ms);
            handles.push(self.spawn_scheduler(shutdown_rx.clone(), heartbeat));
        }
        if self.config.worker.dlq.enabled {
            let heartbeat = health.register("dlq", self.config.worker.dlq.interval_ms);
            handles.push(self.spawn_dlq(shutdown_rx.clone(), heartbeat));
        }
        if self.config.jobs.enabled {
            let heartbeat = health.register("jobs", self.config.jobs.interval_ms);
            handles.push(self.spawn_jobs(shutdown_rx.clone(), heartbeat));
        }
        handles.push(self.spawn_reload_watcher(shutdown_rx.clone(), reload_tx));

        // HTTP surface.
        let state = AppState {
            health: Arc::new(health),
            store: Arc::clone(&self.store),
            push: Arc::clone(&self.push_registry),
        };
        let router = build_router(state);
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|err| SupervisorError::Listen(err.to_string()))?;
        self.info(&format!("listening on port {}", self.config.port));

        let mut server_shutdown = shutdown_rx.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        });
        let signal_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            wait_for_termination().await;
            let _ = signal_tx.send(true);
        });
        if let Err(err) = server.await {
            self.info(&format!("http server stopped: {err}"));
        }
        let _ = shutdown_tx.send(true);

        // Drain within the deadline, then abort stragglers.
        let drain = async {
            for handle in &mut handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
            self.info("drain deadline exceeded; aborting remaining workers");
        }
        Ok(())
    }

    /// Spawns the delivery worker with restart backoff and adapter reload.
    fn spawn_delivery(
        &self,
        shutdown: watch::Receiver<bool>,
        mut reload: watch::Receiver<u64>,
        heartbeat: watch::Sender<Timestamp>,
    ) -> JoinHandle<()> {
        let worker = Arc::new(DeliveryWorker::new(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.store),
            Arc::new(MatcherCache::new()),
            Arc::clone(&self.clock),
            Arc::clone(&self.system_log),
            Arc::clone(&self.metrics),
            Arc::clone(&self.alerts),
            DeliveryWorkerSettings {
                interval_ms: self.config.worker.interval_ms,
                pool_size: self.config.worker.pool_size,
                max_event_age_days: self.config.worker.max_event_age_days,
                log_retention_days: self.config.worker.log_retention_days,
            },
        ));
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let system_log = Arc::clone(&self.system_log);
        let metrics = Arc::clone(&self.metrics);
        let push_registry = Arc::clone(&self.push_registry);
        let mut outer_shutdown = shutdown;
        tokio::spawn(async move {
            let mut restarts: u32 = 0;
            loop {
                if *outer_shutdown.borrow() {
                    break;
                }
                let sources =
                    build_adapters(&store, &clock, &system_log, &metrics, &push_registry);
                // An incarnation ends on shutdown, reload, or crash.
                let (inner_tx, inner_rx) = watch::channel(false);
                let started = Instant::now();
                let run = worker.run(sources, inner_rx, &heartbeat);
                tokio::pin!(run);
                let result = loop {
                    tokio::select! {
                        result = &mut run => break result,
                        _ = outer_shutdown.changed() => {
                            let _ = inner_tx.send(true);
                        }
                        _ = reload.changed() => {
                            let _ = inner_tx.send(true);
                        }
                    }
                };
                if *outer_shutdown.borrow() {
                    break;
                }
                match result {
                    Ok(()) => {
                        // Reload requested; rebuild adapters immediately.
                        continue;
                    }
                    Err(err) => {
                        system_log.log(&SystemEvent {
                            level: LogLevel::Error,
                            component: "supervisor".to_string(),
                            message: format!("delivery worker crashed: {err}"),
                            org_id: None,
                            metadata: serde_json::Value::Null,
                        });
                    }
                }
                if started.elapsed() >= RESTART_RESET {
                    restarts = 0;
                }
                let delay = exponential_delay_ms(1_000, restarts, RESTART_CAP_MS);
                restarts = restarts.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    _ = outer_shutdown.changed() => {}
                }
            }
        })
    }

    /// Spawns the scheduler worker with restart backoff.
    fn spawn_scheduler(
        &self,
        shutdown: watch::Receiver<bool>,
        heartbeat: watch::Sender<Timestamp>,
    ) -> JoinHandle<()> {
        let worker = Arc::new(SchedulerWorker::new(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.system_log),
            Arc::clone(&self.metrics),
            SchedulerWorkerSettings {
                interval_ms: self.config.scheduler.interval_ms,
                batch_size: self.config.scheduler.batch_size,
                pool_size: self.config.scheduler.pool_size,
            },
        ));
        let system_log = Arc::clone(&self.system_log);
        let heartbeat = Arc::new(heartbeat);
        supervise("scheduler", shutdown, system_log, move |inner| {
            let worker = Arc::clone(&worker);
            let heartbeat = Arc::clone(&heartbeat);
            async move {
                worker.run(inner, &heartbeat).await.map_err(|err| err.to_string())
            }
        })
    }

    /// Spawns the DLQ worker with restart backoff.
    fn spawn_dlq(
        &self,
        shutdown: watch::Receiver<bool>,
        heartbeat: watch::Sender<Timestamp>,
    ) -> JoinHandle<()> {
        let worker = Arc::new(DlqWorker::new(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.store),
            Arc::clone(&self.writer),
            Arc::clone(&self.clock),
            Arc::clone(&self.system_log),
            Arc::clone(&self.metrics),
            Arc::clone(&self.alerts),
            DlqWorkerSettings {
                interval_ms: self.config.worker.dlq.interval_ms,
                batch_size: self.config.worker.dlq.batch_size,
            },
        ));
        let system_log = Arc::clone(&self.system_log);
        let heartbeat = Arc::new(heartbeat);
        supervise("dlq", shutdown, system_log, move |inner| {
            let worker = Arc::clone(&worker);
            let heartbeat = Arc::clone(&heartbeat);
            async move {
                worker.run(inner, &heartbeat).await.map_err(|err| err.to_string())
            }
        })
    }

    /// Spawns the scheduled-job worker with restart backoff.
    fn spawn_jobs(
        &self,
        shutdown: watch::Receiver<bool>,
        heartbeat: watch::Sender<Timestamp>,
    ) -> JoinHandle<()> {
        let worker = Arc::new(ScheduledJobWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.dispatcher) as Arc<dyn relay_gate_core::RequestDispatcher>,
            Arc::clone(&self.auth) as Arc<dyn relay_gate_core::AuthHeaderBuilder>,
            Arc::clone(&self.transforms),
            Arc::clone(&self.clock),
            Arc::clone(&self.system_log),
            Arc::clone(&self.metrics),
            JobWorkerSettings {
                interval_ms: self.config.jobs.interval_ms,
                fetch_budget_ms: self.config.jobs.fetch_budget_ms,
                env: self.config.env_snapshot(),
            },
        ));
        let system_log = Arc::clone(&self.system_log);
        let heartbeat = Arc::new(heartbeat);
        supervise("jobs", shutdown, system_log, move |inner| {
            let worker = Arc::clone(&worker);
            let heartbeat = Arc::clone(&heartbeat);
            async move {
                worker.run(inner, &heartbeat).await.map_err(|err| err.to_string())
            }
        })
    }

    /// Spawns the adapter reload watcher.
    fn spawn_reload_watcher(
        &self,
        mut shutdown: watch::Receiver<bool>,
        reload: watch::Sender<u64>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut last_seen: BTreeMap<OrgId, Timestamp> = source_versions(store.as_ref());
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(RELOAD_POLL_MS)) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                let current = source_versions(store.as_ref());
                if current != last_seen {
                    last_seen = current;
                    reload.send_modify(|generation| *generation += 1);
                }
            }
        })
    }

    /// Emits one info system event.
    fn info(&self, message: &str) {
        self.system_log.log(&SystemEvent {
            level: LogLevel::Info,
            component: "supervisor".to_string(),
            message: message.to_string(),
            org_id: None,
            metadata: serde_json::Value::Null,
        });
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Connects the configured state store.
fn connect_store(config: &GatewayConfig) -> Result<Arc<dyn StateStore>, SupervisorError> {
    if config.state_store.uri == ":memory:" {
        return Ok(Arc::new(MemoryStateStore::new()));
    }
    let sqlite = SqliteStateStore::new(&SqliteStoreConfig::at(config.state_store.uri.clone()))
        .map_err(|err| SupervisorError::Store(err.to_string()))?;
    Ok(Arc::new(sqlite))
}

/// Collects push secret header names for trace masking.
fn push_secret_headers(store: &dyn StateStore) -> Vec<String> {
    store
        .active_event_sources()
        .map(|sources| {
            sources
                .iter()
                .filter_map(|source| match &source.source {
                    SourceKind::HttpPush(push) => Some(push.secret_header.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Builds adapters for every active event source, registering push intakes.
fn build_adapters(
    store: &Arc<dyn StateStore>,
    clock: &Arc<dyn Clock>,
    system_log: &Arc<dyn SystemLogSink>,
    metrics: &Arc<dyn GatewayMetrics>,
    push_registry: &Arc<PushRegistry>,
) -> Vec<Box<dyn EventSource>> {
    let configs = store.active_event_sources().unwrap_or_default();
    let mut adapters: Vec<Box<dyn EventSource>> = Vec::new();
    let mut intakes: BTreeMap<OrgId, Arc<PushIntake>> = BTreeMap::new();
    for config in configs {
        match config.source {
            SourceKind::PollingSql(source) => {
                adapters.push(Box::new(PollingSqlSource::new(
                    config.org_id,
                    source,
                    Arc::clone(store),
                    Arc::clone(clock),
                    Arc::clone(system_log),
                    Arc::clone(metrics),
                )));
            }
            SourceKind::Stream(source) => {
                // In-process consumer; broker clients bind BrokerConsumer
                // out of tree and are injected through deployment glue.
                let (consumer, _handle) = ChannelConsumer::new();
                adapters.push(Box::new(StreamSource::new(
                    config.org_id,
                    source,
                    Box::new(consumer),
                    Arc::clone(store),
                    Arc::clone(clock),
                    Arc::clone(system_log),
                    Arc::clone(metrics),
                    STREAM_BATCH_SIZE,
                )));
            }
            SourceKind::HttpPush(source) => {
                let (sender, mut push_source) = push_queue(PUSH_QUEUE_CAPACITY);
                push_source.bind(config.org_id);
                intakes.insert(
                    config.org_id,
                    Arc::new(PushIntake::new(
                        config.org_id,
                        source,
                        sender,
                        Arc::clone(clock),
                    )),
                );
                adapters.push(Box::new(push_source) as Box<dyn EventSource>);
            }
        }
    }
    push_registry.replace(intakes);
    adapters
}

/// Reads the per-org source versions used for reload detection.
fn source_versions(store: &dyn StateStore) -> BTreeMap<OrgId, Timestamp> {
    store
        .active_event_sources()
        .map(|sources| {
            sources.into_iter().map(|source| (source.org_id, source.updated_at)).collect()
        })
        .unwrap_or_default()
}

/// Generic supervised loop: run, restart with backoff, reset when healthy.
fn supervise<F, Fut>(
    name: &'static str,
    mut shutdown: watch::Receiver<bool>,
    system_log: Arc<dyn SystemLogSink>,
    mut factory: F,
) -> JoinHandle<()>
where
    F: FnMut(watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restarts: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            let run = factory(shutdown.clone());
            let result = run.await;
            if *shutdown.borrow() {
                break;
            }
            match result {
                Ok(()) => break,
                Err(err) => {
                    system_log.log(&SystemEvent {
                        level: LogLevel::Error,
                        component: "supervisor".to_string(),
                        message: format!("{name} worker crashed: {err}"),
                        org_id: None,
                        metadata: serde_json::Value::Null,
                    });
                }
            }
            if started.elapsed() >= RESTART_RESET {
                restarts = 0;
            }
            let delay = exponential_delay_ms(1_000, restarts, RESTART_CAP_MS);
            restarts = restarts.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = shutdown.changed() => {}
            }
        }
    })
}

/// Waits for SIGTERM or ctrl-c.
async fn wait_for_termination() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
