//! Redis Streams broker implementation.
//!
//! A topic is a stream. Records are appended with `XADD ... MAXLEN ~`, consumer
//! groups are created with `XGROUP CREATE ... 0 MKSTREAM` so they read from
//! the start, delivery uses `XREADGROUP` and commits are `XACK`. A poll first
//! re-reads the consumer's own pending entries (id `0`), then takes over
//! entries other members left pending past the claim idle time
//! (`XAUTOCLAIM`), and only then asks for new ones (id `>`). Entries held by
//! a consumer that crashed are therefore picked up by the rest of the group.
//!
//! Blocking reads use their own connection so they never stall sends.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamId, StreamRangeReply, StreamReadReply};
use tokio::sync::RwLock;

use techstore_core::events::{Broker, BrokerError, BrokerRecord, Headers, OutboundRecord};

use crate::config::redact_url;

/// Approximate number of entries kept per stream.
const DEFAULT_MAX_LEN: usize = 100_000;
/// How long an entry may stay pending before another member claims it.
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(30);

const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";
const HEADER_PREFIX: &str = "h:";

#[derive(Clone)]
struct Connections {
    commands: redis::aio::ConnectionManager,
    reads: redis::aio::ConnectionManager,
}

/// Redis Streams broker.
pub struct RedisStreamsBroker {
    url: String,
    max_len: usize,
    claim_idle: Duration,
    connections: RwLock<Option<Connections>>,
}

impl std::fmt::Debug for RedisStreamsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsBroker")
            .field("url", &redact_url(&self.url))
            .field("max_len", &self.max_len)
            .field("claim_idle", &self.claim_idle)
            .finish()
    }
}

impl RedisStreamsBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_len: DEFAULT_MAX_LEN,
            claim_idle: DEFAULT_CLAIM_IDLE,
            connections: RwLock::new(None),
        }
    }

    /// Sets the approximate per-stream retention.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Sets how long an entry may stay pending before another member of the
    /// group may take it over.
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    async fn connections(&self) -> Result<Connections, BrokerError> {
        self.connections
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
        max: usize,
        block: Option<Duration>,
        start_id: &str,
    ) -> Result<Vec<BrokerRecord>, BrokerError> {
        let mut conn = self.connections().await?.reads;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(max);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(topics);
        for _ in topics {
            cmd.arg(start_id);
        }

        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::ReceiveFailed(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                match to_record(&stream.key, &entry) {
                    Some(record) => records.push(record),
                    // Pending entries trimmed from the stream come back without fields
                    None => {
                        tracing::warn!(topic = %stream.key, id = %entry.id, "Skipping stream entry without a value");
                        self.ack(group, &stream.key, &entry.id).await?;
                    }
                }
            }
        }
        Ok(records)
    }

    /// Takes over entries of `topic` that other members left pending for at
    /// least the claim idle time.
    async fn claim_idle_entries(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        max: usize,
    ) -> Result<Vec<BrokerRecord>, BrokerError> {
        let mut conn = self.connections().await?.commands;

        // Reply: [next-cursor, [entries...], [deleted ids...]]. Entries have the
        // XRANGE shape; Redis 7 leaves trimmed entries out of the list.
        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(topic)
            .arg(group)
            .arg(consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::ReceiveFailed(e.to_string()))?;

        let Some(entries) = reply.get(1) else {
            return Ok(Vec::new());
        };
        let entries: StreamRangeReply = redis::from_redis_value(entries)
            .map_err(|e| BrokerError::ReceiveFailed(e.to_string()))?;

        let mut records = Vec::new();
        for entry in entries.ids {
            match to_record(topic, &entry) {
                Some(record) => records.push(record),
                None => self.ack(group, topic, &entry.id).await?,
            }
        }
        if !records.is_empty() {
            tracing::debug!(group, consumer, topic, count = records.len(), "Claimed idle stream entries");
        }
        Ok(records)
    }

    async fn ack(&self, group: &str, topic: &str, id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connections().await?.commands;
        let _: i64 = redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::CommitFailed(e.to_string()))?;
        Ok(())
    }
}

fn to_record(topic: &str, entry: &StreamId) -> Option<BrokerRecord> {
    let value: Vec<u8> = entry.get(VALUE_FIELD)?;
    let key: Option<String> = entry.get(KEY_FIELD);

    let mut headers = Headers::new();
    for (field, raw) in &entry.map {
        if let Some(name) = field.strip_prefix(HEADER_PREFIX) {
            if let Ok(value) = redis::from_redis_value::<String>(raw) {
                headers.insert(name.to_string(), value);
            }
        }
    }

    Some(BrokerRecord {
        topic: topic.to_string(),
        id: entry.id.clone(),
        key,
        headers,
        value,
    })
}

fn connection_error(err: redis::RedisError) -> BrokerError {
    BrokerError::ConnectionFailed(err.to_string())
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    fn name(&self) -> &'static str {
        "redis-streams"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let mut slot = self.connections.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.url.as_str()).map_err(connection_error)?;
        let commands = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(connection_error)?;
        let reads = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(connection_error)?;

        *slot = Some(Connections { commands, reads });
        tracing::info!(url = %redact_url(&self.url), "Connected to Redis Streams broker");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connections.write().await.take();
        Ok(())
    }

    async fn send(&self, topic: &str, record: OutboundRecord) -> Result<String, BrokerError> {
        let mut conn = self.connections().await?.commands;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic).arg("MAXLEN").arg("~").arg(self.max_len).arg("*");
        if let Some(key) = &record.key {
            cmd.arg(KEY_FIELD).arg(key);
        }
        for (name, value) in &record.headers {
            cmd.arg(format!("{}{}", HEADER_PREFIX, name)).arg(value);
        }
        cmd.arg(VALUE_FIELD).arg(record.value);

        cmd.query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::SendFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, group: &str, topic: &str) -> Result<(), BrokerError> {
        let mut conn = self.connections().await?.commands;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            // Group already exists
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(BrokerError::ReceiveFailed(err.to_string())),
        }
    }

    async fn poll(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
        max: usize,
        block: Duration,
    ) -> Result<Vec<BrokerRecord>, BrokerError> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let max = max.max(1);

        let pending = self
            .read_group(group, consumer, topics, max, None, "0")
            .await?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        let mut claimed = Vec::new();
        for topic in topics {
            if claimed.len() >= max {
                break;
            }
            claimed.extend(
                self.claim_idle_entries(group, consumer, topic, max - claimed.len())
                    .await?,
            );
        }
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        let block = (!block.is_zero()).then_some(block);
        self.read_group(group, consumer, topics, max, block, ">")
            .await
    }

    async fn commit(&self, group: &str, record: &BrokerRecord) -> Result<(), BrokerError> {
        self.ack(group, &record.topic, &record.id).await
    }
}
