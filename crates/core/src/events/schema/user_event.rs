//! The `UserEvent` record published on the `user-events` channel.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{FieldKind, FieldSchema, RecordSchema};
use crate::events::{
    DomainEvent, EventCategory, EventEnvelope, EventError, EventMetadata, EventType,
};

pub const USER_EVENT_SOURCE: &str = "user-service";

/// Schema of the binary user-event record.
pub fn user_event_schema() -> RecordSchema {
    RecordSchema::new(
        "UserEvent",
        vec![
            FieldSchema::required("eventId", FieldKind::String),
            FieldSchema::required("eventType", FieldKind::String),
            FieldSchema::nullable("userId", FieldKind::Int),
            FieldSchema::required("email", FieldKind::String),
            FieldSchema::nullable("username", FieldKind::String),
            FieldSchema::required("timestamp", FieldKind::String),
            FieldSchema::required("source", FieldKind::String).with_default(USER_EVENT_SOURCE),
            FieldSchema::nullable("metadata", FieldKind::String),
        ],
    )
}

/// Flattens a user event into a `UserEvent` record.
///
/// Metadata other than the source travels as a JSON string in `metadata`.
pub fn user_event_record(event: &DomainEvent) -> Result<Map<String, Value>, EventError> {
    let user = event.payload().as_user().ok_or(EventError::PayloadMismatch {
        event_type: event.event_type(),
        expected: EventCategory::User,
        actual: event.payload().category(),
    })?;

    let metadata = event.metadata();
    let extra = json!({
        "version": metadata.version,
        "correlationId": metadata.correlation_id,
        "attributes": metadata.attributes,
    });

    let mut record = Map::new();
    record.insert("eventId".into(), event.event_id().to_string().into());
    record.insert("eventType".into(), event.event_type().as_str().into());
    record.insert("userId".into(), user.user_id.into());
    record.insert("email".into(), user.email.clone().into());
    record.insert("username".into(), user.username.clone().into());
    record.insert("timestamp".into(), event.timestamp().to_rfc3339().into());
    record.insert("source".into(), metadata.source.clone().into());
    record.insert("metadata".into(), extra.to_string().into());
    Ok(record)
}

/// Rebuilds the JSON envelope of a decoded `UserEvent` record.
pub fn user_event_envelope(record: &Map<String, Value>) -> Result<EventEnvelope, EventError> {
    let field = |name: &str| str_field(record, name);

    let event_id = Uuid::parse_str(field("eventId")?)
        .map_err(|e| EventError::Malformed(format!("UserEvent.eventId: {}", e)))?;
    let event_type: EventType = field("eventType")?.parse()?;
    let timestamp = DateTime::parse_from_rfc3339(field("timestamp")?)
        .map_err(|e| EventError::Malformed(format!("UserEvent.timestamp: {}", e)))?
        .with_timezone(&Utc);

    let mut metadata = EventMetadata::new(field("source")?);
    if let Some(raw) = record.get("metadata").and_then(Value::as_str) {
        let extra: Value = serde_json::from_str(raw)
            .map_err(|e| EventError::Malformed(format!("UserEvent.metadata: {}", e)))?;
        if let Some(version) = extra.get("version").and_then(Value::as_str) {
            metadata.version = version.to_string();
        }
        if let Some(id) = extra.get("correlationId").and_then(Value::as_str) {
            metadata.correlation_id = id.to_string();
        }
        if let Some(Value::Object(attributes)) = extra.get("attributes") {
            metadata.attributes = attributes.clone().into_iter().collect();
        }
    }

    let mut payload = Map::new();
    for key in ["userId", "email", "username"] {
        if let Some(value) = record.get(key).filter(|v| !v.is_null()) {
            payload.insert(key.to_string(), value.clone());
        }
    }

    Ok(EventEnvelope {
        event_id,
        event_type,
        timestamp,
        payload: Value::Object(payload),
        metadata,
    })
}

fn str_field<'a>(record: &'a Map<String, Value>, name: &str) -> Result<&'a str, EventError> {
    record
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| EventError::Malformed(format!("UserEvent.{} is missing", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OrderPayload, SchemaError, UserPayload};

    fn registered() -> DomainEvent {
        DomainEvent::new(
            EventType::UserRegistered,
            UserPayload::new(42, "ana@example.com").with_username("ana"),
            EventMetadata::new("user-service")
                .with_correlation_id("req-7")
                .with_attribute("ip", "10.1.2.3"),
        )
        .unwrap()
    }

    #[test]
    fn test_record_matches_schema() {
        let record = user_event_record(&registered()).unwrap();
        let bytes = user_event_schema().encode(&record).unwrap();
        let decoded = user_event_schema().decode(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_binary_roundtrip_restores_event() {
        let event = registered();
        let schema = user_event_schema();

        let bytes = schema.encode(&user_event_record(&event).unwrap()).unwrap();
        let envelope = user_event_envelope(&schema.decode(&bytes).unwrap()).unwrap();
        let back = DomainEvent::from_envelope(envelope).unwrap();

        assert_eq!(back, event);
    }

    #[test]
    fn test_optional_fields_encode_as_null() {
        let event = DomainEvent::new(
            EventType::UserLogin,
            UserPayload {
                user_id: None,
                email: "bob@example.com".to_string(),
                username: None,
            },
            EventMetadata::new("user-service"),
        )
        .unwrap();

        let record = user_event_record(&event).unwrap();
        assert_eq!(record["userId"], Value::Null);
        assert_eq!(record["username"], Value::Null);
        assert!(user_event_schema().encode(&record).is_ok());
    }

    #[test]
    fn test_user_id_is_a_32_bit_int() {
        let event = DomainEvent::new(
            EventType::UserRegistered,
            UserPayload::new(i64::from(i32::MAX) + 1, "big@example.com"),
            EventMetadata::new("user-service"),
        )
        .unwrap();

        let record = user_event_record(&event).unwrap();
        assert!(matches!(
            user_event_schema().encode(&record),
            Err(SchemaError::TypeMismatch { expected: "int", .. })
        ));

        let event = DomainEvent::new(
            EventType::UserRegistered,
            UserPayload::new(i64::from(i32::MAX), "max@example.com"),
            EventMetadata::new("user-service"),
        )
        .unwrap();
        let record = user_event_record(&event).unwrap();
        assert!(user_event_schema().encode(&record).is_ok());
    }

    #[test]
    fn test_non_user_event_is_rejected() {
        let event = DomainEvent::new(
            EventType::OrderCreated,
            OrderPayload::new("A-1"),
            EventMetadata::default(),
        )
        .unwrap();

        assert!(matches!(
            user_event_record(&event),
            Err(EventError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn test_envelope_requires_event_id() {
        let mut record = user_event_record(&registered()).unwrap();
        record.insert("eventId".into(), "not-a-uuid".into());
        assert!(matches!(
            user_event_envelope(&record),
            Err(EventError::Malformed(_))
        ));
    }
}
