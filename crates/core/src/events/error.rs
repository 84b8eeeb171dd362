use thiserror::Error;

use super::{EventCategory, EventType};

/// Errors raised while building or parsing domain events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("{event_type} expects a {expected} payload, got {actual}")]
    PayloadMismatch {
        event_type: EventType,
        expected: EventCategory,
        actual: EventCategory,
    },
    #[error("Invalid payload for {event_type}: {reason}")]
    InvalidPayload {
        event_type: EventType,
        reason: String,
    },
    #[error("Malformed event: {0}")]
    Malformed(String),
}

/// Errors raised by the binary record codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Field {field} expects {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Unexpected end of input while reading {0}")]
    Truncated(String),
    #[error("Invalid union branch {index} for field {field}")]
    InvalidUnionIndex { field: String, index: i64 },
    #[error("Field {0} is not valid UTF-8")]
    InvalidUtf8(String),
    #[error("Varint is too long")]
    VarintOverflow,
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Errors raised by message brokers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Broker is not connected")]
    NotConnected,
    #[error("Send to {topic} failed: {reason}")]
    SendFailed { topic: String, reason: String },
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

impl BrokerError {
    /// Returns true if the broker connection itself is gone.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_) | BrokerError::NotConnected
        )
    }
}
