//! The event bus: one broker connection shared by a producer and any number
//! of consumers.

use std::sync::Arc;

use serde_json::Value;

use techstore_core::connection::{ConnectionState, RetryPolicy};
use techstore_core::events::schema::SchemaRegistry;
use techstore_core::events::{Broker, DomainEvent};

use super::link::BrokerLink;
use super::{EventConsumer, EventProducer, PublishReceipt, Result};

/// Publishes and consumes domain events for one service.
pub struct EventBus {
    link: Arc<BrokerLink>,
    registry: Arc<SchemaRegistry>,
    service: String,
    publish_retry: RetryPolicy,
    producer: EventProducer,
}

impl EventBus {
    /// Creates a bus for `service` over `broker` with the default schemas and
    /// publish retry policy. Nothing connects until first use.
    pub fn new(broker: Arc<dyn Broker>, service: impl Into<String>) -> Self {
        let link = Arc::new(BrokerLink::new(broker));
        let registry = Arc::new(SchemaRegistry::with_defaults());
        let service = service.into();
        let publish_retry = RetryPolicy::publish();
        let producer = EventProducer::new(
            Arc::clone(&link),
            Arc::clone(&registry),
            publish_retry.clone(),
            service.clone(),
        );
        Self {
            link,
            registry,
            service,
            publish_retry,
            producer,
        }
    }

    pub fn with_schema_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Arc::new(registry);
        self.rebuild_producer();
        self
    }

    pub fn with_publish_retry(mut self, retry: RetryPolicy) -> Self {
        self.publish_retry = retry;
        self.rebuild_producer();
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Consumer group every instance of this service joins.
    pub fn consumer_group(&self) -> String {
        format!("{}-group", self.service)
    }

    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }

    /// Creates a consumer in this service's group.
    pub fn consumer(&self) -> EventConsumer {
        EventConsumer::new(
            Arc::clone(&self.link),
            Arc::clone(&self.registry),
            self.consumer_group(),
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Connects to the broker. Does nothing when already connected.
    pub async fn connect(&self) -> Result<()> {
        self.link.ensure_connected().await
    }

    /// Closes the broker connection shared by the producer and consumers.
    pub async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await
    }

    pub async fn publish(&self, event: &DomainEvent) -> Result<PublishReceipt> {
        self.producer.publish(event).await
    }

    pub async fn publish_to(&self, topic: &str, event: &DomainEvent) -> Result<PublishReceipt> {
        self.producer.publish_to(topic, event).await
    }

    pub async fn send_to_dlq<E>(
        &self,
        original_topic: &str,
        event_type: &str,
        data: Value,
        error: &E,
    ) -> Result<PublishReceipt>
    where
        E: std::error::Error,
    {
        self.producer
            .send_to_dlq(original_topic, event_type, data, error)
            .await
    }

    fn rebuild_producer(&mut self) {
        self.producer = EventProducer::new(
            Arc::clone(&self.link),
            Arc::clone(&self.registry),
            self.publish_retry.clone(),
            self.service.clone(),
        );
    }
}
