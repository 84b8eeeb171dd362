//! Event producer.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use techstore_core::connection::{ConnectionState, RetryPolicy};
use techstore_core::events::schema::{user_event_record, SchemaRegistry};
use techstore_core::events::{
    headers, DeadLetterRecord, DomainEvent, Headers, OutboundRecord, DEAD_LETTER_TOPIC,
    EVENT_SCHEMA_VERSION,
};

use super::link::BrokerLink;
use super::{EventBusError, Result};

/// Where a published message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    /// Broker-assigned message id.
    pub id: String,
    /// Id of the published event, `None` for dead-letter records.
    pub event_id: Option<Uuid>,
    /// Send attempts it took.
    pub attempts: u32,
}

/// Publishes domain events and dead-letter records.
///
/// Connects lazily on first use. Sends are retried according to the publish
/// retry policy; a send that exhausts its retries does not change the
/// connection state.
#[derive(Clone)]
pub struct EventProducer {
    link: Arc<BrokerLink>,
    registry: Arc<SchemaRegistry>,
    retry: RetryPolicy,
    service: String,
}

impl EventProducer {
    pub(crate) fn new(
        link: Arc<BrokerLink>,
        registry: Arc<SchemaRegistry>,
        retry: RetryPolicy,
        service: String,
    ) -> Self {
        Self {
            link,
            registry,
            retry,
            service,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Publishes `event` on the channel of its type.
    pub async fn publish(&self, event: &DomainEvent) -> Result<PublishReceipt> {
        self.publish_to(event.event_type().default_topic(), event)
            .await
    }

    /// Publishes `event` on `topic`.
    ///
    /// Topics with a registered schema carry the binary record; everything
    /// else carries the JSON envelope. Schema violations fail before anything
    /// is sent.
    pub async fn publish_to(&self, topic: &str, event: &DomainEvent) -> Result<PublishReceipt> {
        let mut headers = Headers::new();
        headers.insert(headers::EVENT_TYPE.to_string(), event.event_type().to_string());
        headers.insert(headers::TIMESTAMP.to_string(), event.timestamp().to_rfc3339());
        headers.insert(headers::SOURCE.to_string(), event.metadata().source.clone());

        let value = match self.registry.get(topic) {
            Some(schema) => {
                headers.insert(headers::VERSION.to_string(), EVENT_SCHEMA_VERSION.to_string());
                schema.encode(&user_event_record(event)?)?
            }
            None => event.to_json()?,
        };

        let record = OutboundRecord {
            key: Some(event.correlation_id().to_string()),
            headers,
            value,
        };

        let mut receipt = self.send(topic, record).await?;
        receipt.event_id = Some(event.event_id());
        tracing::debug!(
            topic = %topic,
            event_type = %event.event_type(),
            event_id = %event.event_id(),
            attempts = receipt.attempts,
            "Event published"
        );
        Ok(receipt)
    }

    /// Writes a dead-letter record for a message that could not be processed.
    ///
    /// The `error-type` header carries the error's type name.
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
        self.send_dead_letter(
            original_topic,
            event_type,
            data,
            short_type_name::<E>(),
            &error.to_string(),
        )
        .await
    }

    /// Like [`send_to_dlq`](Self::send_to_dlq) with an explicit error type.
    pub async fn send_dead_letter(
        &self,
        original_topic: &str,
        event_type: &str,
        data: Value,
        error_type: &str,
        error_message: &str,
    ) -> Result<PublishReceipt> {
        let dead_letter = DeadLetterRecord::new(
            original_topic,
            event_type,
            data,
            error_message,
            self.service.clone(),
        );
        let value = serde_json::to_vec(&dead_letter)
            .map_err(|e| EventBusError::Serialization(e.to_string()))?;

        let mut headers = Headers::new();
        headers.insert(headers::SOURCE_TOPIC.to_string(), original_topic.to_string());
        headers.insert(headers::ERROR_TYPE.to_string(), error_type.to_string());

        let record = OutboundRecord {
            key: None,
            headers,
            value,
        };

        let receipt = self.send(DEAD_LETTER_TOPIC, record).await?;
        tracing::warn!(
            source_topic = %original_topic,
            event_type = %event_type,
            error_type = %error_type,
            "Message sent to dead-letter queue"
        );
        Ok(receipt)
    }

    async fn send(&self, topic: &str, record: OutboundRecord) -> Result<PublishReceipt> {
        self.link.ensure_connected().await?;

        let broker = self.link.broker();
        let mut attempts = 0;
        let outcome = self
            .retry
            .run(
                || {
                    attempts += 1;
                    broker.send(topic, record.clone())
                },
                |attempt, err| {
                    tracing::warn!(
                        topic = %topic,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "Publish attempt failed"
                    );
                },
            )
            .await;

        match outcome {
            Ok(id) => Ok(PublishReceipt {
                topic: topic.to_string(),
                id,
                event_id: None,
                attempts,
            }),
            Err(exhausted) => {
                tracing::error!(topic = %topic, error = %exhausted, "Publish failed");
                Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    attempts: exhausted.attempts,
                    reason: exhausted.last.to_string(),
                })
            }
        }
    }
}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
