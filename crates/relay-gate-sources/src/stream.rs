// crates/relay-gate-sources/src/stream.rs
// ============================================================================
// Module: Stream Source
// Description: Consumer-group stream adapter over the broker seam.
// Purpose: Produce normalized events from a message-broker topic.
// Dependencies: relay-gate-core, async-trait, serde_json
// ============================================================================

//! ## Overview
//! The stream adapter consumes a topic through the [`BrokerConsumer`] seam.
//! Offsets commit only after the delivery worker has enqueued the batch;
//! parse failures advance the offset with a warning so one corrupt message
//! cannot wedge a partition. Each `(org, topic)` pair gets its own consumer
//! group so tenants stay isolated. Concrete broker clients (Kafka, NATS, …)
//! implement [`BrokerConsumer`] out of tree; the in-tree [`ChannelConsumer`]
//! backs tests and single-process deployments.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use relay_gate_core::Clock;
use relay_gate_core::EntityRid;
use relay_gate_core::MetricEvent;
use relay_gate_core::NormalizedEvent;
use relay_gate_core::OrgId;
use relay_gate_core::SourceCheckpoint;
use relay_gate_core::SourceType;
use relay_gate_core::StreamSourceConfig;
use relay_gate_core::event_fingerprint;
use relay_gate_core::interfaces::EventSource;
use relay_gate_core::interfaces::GatewayMetrics;
use relay_gate_core::interfaces::LogLevel;
use relay_gate_core::interfaces::SourceBatch;
use relay_gate_core::interfaces::SourceError;
use relay_gate_core::interfaces::StateStore;
use relay_gate_core::interfaces::SystemEvent;
use relay_gate_core::interfaces::SystemLogSink;
use serde_json::Value;

// ============================================================================
// SECTION: Broker Seam
// ============================================================================

/// One record consumed from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    /// Partition the record came from.
    pub partition: i32,
    /// Offset of the record within its partition.
    pub offset: i64,
    /// Raw record payload.
    pub payload: Vec<u8>,
}

/// Minimal consumer-group contract the stream adapter builds on.
///
/// # Invariants
/// - `poll` returns records in per-partition offset order.
/// - `commit` durably stores next-to-consume offsets for the group.
pub trait BrokerConsumer: Send + Sync {
    /// Fetches up to `max_records` pending records.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the broker is unreachable.
    fn poll(&mut self, max_records: usize) -> Result<Vec<BrokerRecord>, SourceError>;

    /// Commits next-to-consume offsets per partition.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the commit fails.
    fn commit(&mut self, offsets: &BTreeMap<i32, i64>) -> Result<(), SourceError>;
}

/// Returns the consumer group name isolating one `(org, topic)` pair.
#[must_use]
pub fn consumer_group(org_id: OrgId, topic: &str) -> String {
    format!("relay-gate-{org_id}-{topic}")
}

// ============================================================================
// SECTION: Channel Consumer
// ============================================================================

/// Shared queue state behind the in-process consumer.
#[derive(Debug, Default)]
struct ChannelQueue {
    /// Records not yet consumed, in publish order.
    records: VecDeque<BrokerRecord>,
    /// Committed next-to-consume offsets.
    committed: BTreeMap<i32, i64>,
}

/// Producer handle publishing records into a [`ChannelConsumer`].
#[derive(Debug, Clone)]
pub struct ChannelConsumerHandle {
    /// Shared queue.
    queue: Arc<Mutex<ChannelQueue>>,
    /// Next offset per partition on the producer side.
    next_offsets: Arc<Mutex<BTreeMap<i32, i64>>>,
}

impl ChannelConsumerHandle {
    /// Publishes one payload to a partition, assigning the next offset.
    pub fn publish(&self, partition: i32, payload: impl Into<Vec<u8>>) {
        let Ok(mut next) = self.next_offsets.lock() else {
            return;
        };
        let offset = next.entry(partition).or_insert(0);
        let record = BrokerRecord {
            partition,
            offset: *offset,
            payload: payload.into(),
        };
        *offset += 1;
        drop(next);
        if let Ok(mut queue) = self.queue.lock() {
            queue.records.push_back(record);
        }
    }

    /// Returns the committed next-to-consume offsets.
    #[must_use]
    pub fn committed(&self) -> BTreeMap<i32, i64> {
        self.queue.lock().map(|queue| queue.committed.clone()).unwrap_or_default()
    }
}

/// In-process broker consumer for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct ChannelConsumer {
    /// Shared queue.
    queue: Arc<Mutex<ChannelQueue>>,
}

impl ChannelConsumer {
    /// Creates a consumer and its producer handle.
    #[must_use]
    pub fn new() -> (Self, ChannelConsumerHandle) {
        let queue = Arc::new(Mutex::new(ChannelQueue::default()));
        let handle = ChannelConsumerHandle {
            queue: Arc::clone(&queue),
            next_offsets: Arc::new(Mutex::new(BTreeMap::new())),
        };
        (
            Self {
                queue,
            },
            handle,
        )
    }
}

impl BrokerConsumer for ChannelConsumer {
    fn poll(&mut self, max_records: usize) -> Result<Vec<BrokerRecord>, SourceError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| SourceError::Fatal("channel consumer mutex poisoned".to_string()))?;
        let take = queue.records.len().min(max_records);
        Ok(queue.records.drain(..take).collect())
    }

    fn commit(&mut self, offsets: &BTreeMap<i32, i64>) -> Result<(), SourceError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| SourceError::Fatal("channel consumer mutex poisoned".to_string()))?;
        for (partition, offset) in offsets {
            queue.committed.insert(*partition, *offset);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Stream Source
// ============================================================================

/// Stream event source for one org.
pub struct StreamSource {
    /// Owning organization.
    org_id: OrgId,
    /// Adapter configuration.
    config: StreamSourceConfig,
    /// Broker consumer bound to this org's consumer group.
    consumer: Box<dyn BrokerConsumer>,
    /// Offsets of the last uncommitted batch.
    committed: BTreeMap<i32, i64>,
    /// State store holding the durable checkpoint.
    store: Arc<dyn StateStore>,
    /// Clock for `produced_at` stamps.
    clock: Arc<dyn Clock>,
    /// System log sink for parse warnings.
    system_log: Arc<dyn SystemLogSink>,
    /// Metrics sink for skip counters.
    metrics: Arc<dyn GatewayMetrics>,
    /// Records fetched per poll.
    batch_size: usize,
}

impl StreamSource {
    /// Creates a stream source over a consumer bound to
    /// [`consumer_group(org, topic)`](consumer_group).
    #[must_use]
    pub fn new(
        org_id: OrgId,
        config: StreamSourceConfig,
        consumer: Box<dyn BrokerConsumer>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        system_log: Arc<dyn SystemLogSink>,
        metrics: Arc<dyn GatewayMetrics>,
        batch_size: usize,
    ) -> Self {
        Self {
            org_id,
            config,
            consumer,
            committed: BTreeMap::new(),
            store,
            clock,
            system_log,
            metrics,
            batch_size: batch_size.max(1),
        }
    }

    /// Parses one record into a normalized event.
    fn build_event(&self, record: &BrokerRecord) -> Result<NormalizedEvent, SourceError> {
        let value: Value =
            serde_json::from_slice(&record.payload).map_err(|err| SourceError::Corrupt {
                skip_category: "message_parse".to_string(),
                message: format!(
                    "partition {} offset {}: {err}",
                    record.partition, record.offset
                ),
            })?;
        let event_type = value
            .get("event_type")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .or_else(|| self.config.default_event_type.clone())
            .ok_or_else(|| SourceError::Corrupt {
                skip_category: "missing_event_type".to_string(),
                message: format!(
                    "partition {} offset {}: no event_type",
                    record.partition, record.offset
                ),
            })?;
        let entity_rid =
            value.get("entity_rid").and_then(Value::as_str).map(EntityRid::new);
        let payload = value.get("payload").cloned().unwrap_or(value.clone());
        let source_event_id = value
            .get("event_id")
            .and_then(Value::as_str)
            .map_or_else(
                || format!("{}:{}:{}", self.config.topic, record.partition, record.offset),
                ToString::to_string,
            );
        let fingerprint =
            event_fingerprint(self.org_id, SourceType::Stream.as_str(), &source_event_id)
                .map_err(|err| SourceError::Fatal(format!("fingerprint failure: {err}")))?;
        Ok(NormalizedEvent {
            org_id: self.org_id,
            event_type,
            entity_rid,
            payload,
            source_event_id,
            produced_at: self.clock.now(),
            fingerprint,
        })
    }

    /// Emits a skip warning for one unparseable record.
    fn warn_skip(&self, skip_category: &str, message: &str) {
        self.system_log.log(&SystemEvent {
            level: LogLevel::Warn,
            component: "stream".to_string(),
            message: format!("skipped message: {message}"),
            org_id: Some(self.org_id),
            metadata: serde_json::json!({
                "skip_category": skip_category,
                "topic": self.config.topic,
            }),
        });
        self.metrics.record(&MetricEvent::SourceRecordSkipped {
            org_id: self.org_id,
            skip_category: skip_category.to_string(),
        });
    }
}

#[async_trait]
impl EventSource for StreamSource {
    fn org_id(&self) -> OrgId {
        self.org_id
    }

    fn source_type(&self) -> SourceType {
        SourceType::Stream
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        let checkpoint = self
            .store
            .checkpoint(self.org_id, SourceType::Stream)
            .map_err(|err| SourceError::Transient(format!("checkpoint load failed: {err}")))?;
        self.committed = match checkpoint {
            Some(SourceCheckpoint::StreamOffsets {
                offsets,
            }) => offsets,
            Some(SourceCheckpoint::RowId {
                ..
            }) => {
                return Err(SourceError::Fatal(
                    "stream source found a polling-sql checkpoint".to_string(),
                ));
            }
            None => BTreeMap::new(),
        };
        Ok(())
    }

    async fn stop(&mut self) {}

    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError> {
        let records = self.consumer.poll(self.batch_size)?;
        if records.is_empty() {
            return Ok(SourceBatch::empty());
        }
        let mut next_offsets = self.committed.clone();
        let mut events = Vec::with_capacity(records.len());
        for record in &records {
            let next = record.offset.saturating_add(1);
            let entry = next_offsets.entry(record.partition).or_insert(0);
            *entry = (*entry).max(next);
            match self.build_event(record) {
                Ok(event) => events.push(event),
                Err(SourceError::Corrupt {
                    skip_category,
                    message,
                }) => self.warn_skip(&skip_category, &message),
                Err(other) => return Err(other),
            }
        }
        Ok(SourceBatch {
            events,
            checkpoint: Some(SourceCheckpoint::StreamOffsets {
                offsets: next_offsets,
            }),
        })
    }

    async fn commit(&mut self, checkpoint: &SourceCheckpoint) -> Result<(), SourceError> {
        let SourceCheckpoint::StreamOffsets {
            offsets,
        } = checkpoint
        else {
            return Err(SourceError::Fatal("stream source expects offset checkpoints".to_string()));
        };
        self.consumer.commit(offsets)?;
        self.store
            .advance_checkpoint(self.org_id, SourceType::Stream, checkpoint)
            .map_err(|err| SourceError::Transient(format!("checkpoint commit failed: {err}")))?;
        self.committed = offsets.clone();
        Ok(())
    }
}
