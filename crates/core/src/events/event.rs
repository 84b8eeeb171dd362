use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{EventError, EventPayload, EventType};

/// Version stamped on every event this crate builds.
pub const EVENT_SCHEMA_VERSION: &str = "1.0.0";

/// Routing and tracing information attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub source: String,
    pub version: String,
    pub correlation_id: String,
    /// Free-form extra fields, serialized alongside the known ones.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl EventMetadata {
    /// Metadata for an event emitted by `source` with a fresh correlation id.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            version: EVENT_SCHEMA_VERSION.to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            attributes: BTreeMap::new(),
        }
    }

    /// Reuses the correlation id of the request that caused this event.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// An immutable, validated domain event.
///
/// Built once with [`DomainEvent::new`]; the id and timestamp are assigned at
/// construction and never change, however many times the event is published.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    event_id: Uuid,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
    metadata: EventMetadata,
}

impl DomainEvent {
    /// Creates an event after checking the payload against the event type.
    pub fn new(
        event_type: EventType,
        payload: impl Into<EventPayload>,
        metadata: EventMetadata,
    ) -> Result<Self, EventError> {
        let payload = payload.into();
        payload.validate_for(event_type)?;

        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            payload,
            metadata,
        })
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn correlation_id(&self) -> &str {
        &self.metadata.correlation_id
    }

    /// Converts the event to its wire envelope.
    pub fn to_envelope(&self) -> Result<EventEnvelope, EventError> {
        let payload =
            serde_json::to_value(&self.payload).map_err(|e| EventError::Malformed(e.to_string()))?;

        Ok(EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type,
            timestamp: self.timestamp,
            payload,
            metadata: self.metadata.clone(),
        })
    }

    /// Rebuilds an event received from the wire, validating its payload.
    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, EventError> {
        let payload = EventPayload::from_value(envelope.event_type, envelope.payload)?;
        payload.validate_for(envelope.event_type)?;

        Ok(Self {
            event_id: envelope.event_id,
            event_type: envelope.event_type,
            timestamp: envelope.timestamp,
            payload,
            metadata: envelope.metadata,
        })
    }

    /// Serializes the event as a JSON envelope.
    pub fn to_json(&self) -> Result<Vec<u8>, EventError> {
        let envelope = self.to_envelope()?;
        serde_json::to_vec(&envelope).map_err(|e| EventError::Malformed(e.to_string()))
    }

    /// Parses a JSON envelope.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        let envelope: EventEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;
        Self::from_envelope(envelope)
    }
}

/// JSON wire form of a [`DomainEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub metadata: EventMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OrderPayload, UserPayload};
    use serde_json::json;

    fn order_created() -> DomainEvent {
        DomainEvent::new(
            EventType::OrderCreated,
            OrderPayload::new("A-100").with_user(7).with_total(59.9),
            EventMetadata::new("order-service").with_correlation_id("req-1"),
        )
        .unwrap()
    }

    #[test]
    fn test_new_assigns_identity() {
        let first = order_created();
        let second = order_created();

        assert_ne!(first.event_id(), second.event_id());
        assert_eq!(first.event_id().get_version_num(), 4);
        assert_eq!(first.metadata().version, "1.0.0");
        assert_eq!(first.correlation_id(), "req-1");
    }

    #[test]
    fn test_new_generates_correlation_id() {
        let event = DomainEvent::new(
            EventType::UserRegistered,
            UserPayload::new(1, "ana@example.com"),
            EventMetadata::new("user-service"),
        )
        .unwrap();

        assert!(Uuid::parse_str(event.correlation_id()).is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_payload() {
        let result = DomainEvent::new(
            EventType::UserRegistered,
            UserPayload::new(1, "not-an-email"),
            EventMetadata::default(),
        );
        assert!(matches!(result, Err(EventError::InvalidPayload { .. })));
    }

    #[test]
    fn test_new_rejects_mismatched_payload() {
        let result = DomainEvent::new(
            EventType::PaymentProcessed,
            OrderPayload::new("A-1"),
            EventMetadata::default(),
        );
        assert!(matches!(result, Err(EventError::PayloadMismatch { .. })));
    }

    #[test]
    fn test_envelope_shape() {
        let event = order_created();
        let value = serde_json::to_value(event.to_envelope().unwrap()).unwrap();

        assert_eq!(value["eventType"], "order.created");
        assert_eq!(value["eventId"], event.event_id().to_string());
        assert_eq!(value["payload"], json!({"orderId": "A-100", "userId": 7, "total": 59.9}));
        assert_eq!(
            value["metadata"],
            json!({"source": "order-service", "version": "1.0.0", "correlationId": "req-1"})
        );
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_json_roundtrip_preserves_identity() {
        let event = DomainEvent::new(
            EventType::OrderCancelled,
            OrderPayload::new("A-9").with_reason("customer request"),
            EventMetadata::new("order-service").with_attribute("ip", "10.0.0.1"),
        )
        .unwrap();

        let bytes = event.to_json().unwrap();
        let back = DomainEvent::from_json(&bytes).unwrap();

        assert_eq!(back, event);
        assert_eq!(back.metadata().attributes["ip"], json!("10.0.0.1"));
    }

    #[test]
    fn test_from_json_validates_payload() {
        let bytes = serde_json::to_vec(&json!({
            "eventId": Uuid::new_v4(),
            "eventType": "order.cancelled",
            "timestamp": "2024-05-01T10:00:00Z",
            "payload": {"orderId": "A-1"},
            "metadata": {"source": "x", "version": "1.0.0", "correlationId": "c"}
        }))
        .unwrap();

        assert!(matches!(
            DomainEvent::from_json(&bytes),
            Err(EventError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            DomainEvent::from_json(b"{not json"),
            Err(EventError::Malformed(_))
        ));
    }
}
