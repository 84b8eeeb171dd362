use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::BrokerError;

pub type Headers = BTreeMap<String, String>;

/// A message handed to the broker for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Partitioning key, the correlation id for domain events.
    pub key: Option<String>,
    pub headers: Headers,
    pub value: Vec<u8>,
}

/// A message read back from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    /// Broker-assigned position, used to commit the record.
    pub id: String,
    pub key: Option<String>,
    pub headers: Headers,
    pub value: Vec<u8>,
}

/// A log-structured message broker with consumer groups.
///
/// Records are delivered to each group at least once: a record stays pending
/// for its group until it is committed.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Appends a record to `topic` and returns its id.
    async fn send(&self, topic: &str, record: OutboundRecord) -> Result<String, BrokerError>;

    /// Joins `group` to `topic`, starting from the beginning of the log.
    async fn subscribe(&self, group: &str, topic: &str) -> Result<(), BrokerError>;

    /// Reads up to `max` records for `consumer` in `group`, waiting at most
    /// `block` for new records when none are available.
    ///
    /// Records delivered earlier but never committed are returned first: the
    /// consumer's own, then records another member of the group has held
    /// uncommitted past the backend's claim idle time.
    async fn poll(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
        max: usize,
        block: Duration,
    ) -> Result<Vec<BrokerRecord>, BrokerError>;

    /// Acknowledges `record` for `group`.
    async fn commit(&self, group: &str, record: &BrokerRecord) -> Result<(), BrokerError>;
}
