//! In-memory broker implementation.
//!
//! Every topic is an append-only log. Each consumer group keeps, per topic,
//! the offset of the next record to hand out and the records handed out but
//! not yet committed. A poll returns, in order of preference: the caller's
//! own uncommitted records, records another member has held uncommitted for
//! at least the claim idle time (that member is presumed dead), then new
//! records.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use techstore_core::events::{Broker, BrokerError, BrokerRecord, Headers, OutboundRecord};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    headers: Headers,
    value: Vec<u8>,
}

/// How long a record may stay uncommitted before another member claims it.
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Delivery {
    consumer: String,
    delivered_at: Instant,
}

impl Delivery {
    fn new(consumer: &str, now: Instant) -> Self {
        Self {
            consumer: consumer.to_string(),
            delivered_at: now,
        }
    }
}

#[derive(Debug, Default)]
struct TopicCursor {
    next: usize,
    /// Delivered but uncommitted offsets, with the consumer holding them.
    pending: BTreeMap<usize, Delivery>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<StoredRecord>>,
    /// group -> topic -> cursor
    groups: HashMap<String, HashMap<String, TopicCursor>>,
}

impl BrokerState {
    fn record(&self, topic: &str, offset: usize) -> Option<BrokerRecord> {
        let stored = self.topics.get(topic)?.get(offset)?;
        Some(BrokerRecord {
            topic: topic.to_string(),
            id: offset.to_string(),
            key: stored.key.clone(),
            headers: stored.headers.clone(),
            value: stored.value.clone(),
        })
    }

    fn take_batch(
        &mut self,
        group: &str,
        consumer: &str,
        topics: &[String],
        max: usize,
        claim_idle: Duration,
    ) -> Vec<BrokerRecord> {
        let now = Instant::now();
        let cursors = self.groups.entry(group.to_string()).or_default();
        let mut offsets: Vec<(String, usize)> = Vec::new();

        // Redeliver this consumer's uncommitted records first
        for topic in topics {
            let cursor = cursors.entry(topic.clone()).or_default();
            for (offset, delivery) in cursor.pending.iter_mut() {
                if offsets.len() >= max {
                    break;
                }
                if delivery.consumer == consumer {
                    delivery.delivered_at = now;
                    offsets.push((topic.clone(), *offset));
                }
            }
        }

        // Then claim records abandoned by other members
        if offsets.is_empty() {
            for topic in topics {
                let cursor = cursors.entry(topic.clone()).or_default();
                for (offset, delivery) in cursor.pending.iter_mut() {
                    if offsets.len() >= max {
                        break;
                    }
                    if now.saturating_duration_since(delivery.delivered_at) >= claim_idle {
                        tracing::debug!(
                            group,
                            topic = %topic,
                            offset,
                            from = %delivery.consumer,
                            to = %consumer,
                            "Claiming idle record"
                        );
                        *delivery = Delivery::new(consumer, now);
                        offsets.push((topic.clone(), *offset));
                    }
                }
            }
        }

        if offsets.is_empty() {
            for topic in topics {
                let available = self.topics.get(topic).map_or(0, Vec::len);
                let cursor = cursors.entry(topic.clone()).or_default();
                while cursor.next < available && offsets.len() < max {
                    cursor.pending.insert(cursor.next, Delivery::new(consumer, now));
                    offsets.push((topic.clone(), cursor.next));
                    cursor.next += 1;
                }
            }
        }

        offsets
            .into_iter()
            .filter_map(|(topic, offset)| self.record(&topic, offset))
            .collect()
    }
}

/// Broker keeping every topic in process memory.
///
/// Records are retained for the broker's lifetime. Groups created on a topic
/// start from its first record.
#[derive(Debug)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    claim_idle: Duration,
    appended: Notify,
    connected: AtomicBool,
    failing_connects: AtomicBool,
    failing_sends: AtomicUsize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            claim_idle: DEFAULT_CLAIM_IDLE,
            appended: Notify::new(),
            connected: AtomicBool::new(false),
            failing_connects: AtomicBool::new(false),
            failing_sends: AtomicUsize::new(0),
        }
    }

    /// Sets how long a record may stay uncommitted before another member of
    /// the group may take it over.
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Makes connection attempts fail until switched off.
    pub fn fail_connects(&self, fail: bool) {
        self.failing_connects.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Every record appended to `topic`, oldest first.
    pub async fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        let state = self.state.lock().await;
        let count = state.topics.get(topic).map_or(0, Vec::len);
        (0..count)
            .filter_map(|offset| state.record(topic, offset))
            .collect()
    }

    /// Records of `topic` delivered to `group` but not yet committed.
    pub async fn pending_count(&self, group: &str, topic: &str) -> usize {
        let state = self.state.lock().await;
        state
            .groups
            .get(group)
            .and_then(|cursors| cursors.get(topic))
            .map_or(0, |cursor| cursor.pending.len())
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn take_send_failure(&self) -> bool {
        self.failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        if self.failing_connects.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionFailed(
                "in-memory broker refused the connection".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        // Wake blocked pollers so they observe the disconnect
        self.appended.notify_waiters();
        Ok(())
    }

    async fn send(&self, topic: &str, record: OutboundRecord) -> Result<String, BrokerError> {
        self.ensure_connected()?;
        if self.take_send_failure() {
            return Err(BrokerError::SendFailed {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        let offset = {
            let mut state = self.state.lock().await;
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(StoredRecord {
                key: record.key,
                headers: record.headers,
                value: record.value,
            });
            log.len() - 1
        };

        self.appended.notify_waiters();
        Ok(offset.to_string())
    }

    async fn subscribe(&self, group: &str, topic: &str) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(topic.to_string())
            .or_default();
        Ok(())
    }

    async fn poll(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
        max: usize,
        block: Duration,
    ) -> Result<Vec<BrokerRecord>, BrokerError> {
        let deadline = Instant::now() + block;

        loop {
            self.ensure_connected()?;

            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let batch = {
                let mut state = self.state.lock().await;
                state.take_batch(group, consumer, topics, max.max(1), self.claim_idle)
            };
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&self, group: &str, record: &BrokerRecord) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        let offset: usize = record
            .id
            .parse()
            .map_err(|_| BrokerError::CommitFailed(format!("invalid record id {}", record.id)))?;

        let mut state = self.state.lock().await;
        let removed = state
            .groups
            .get_mut(group)
            .and_then(|cursors| cursors.get_mut(&record.topic))
            .and_then(|cursor| cursor.pending.remove(&offset));

        if removed.is_none() {
            tracing::debug!(group, topic = %record.topic, id = %record.id, "Commit of a record that was not pending");
        }
        Ok(())
    }
}
