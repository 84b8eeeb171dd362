use thiserror::Error;

use techstore_core::events::{BrokerError, EventError, SchemaError};

/// Errors returned by the event bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Broker connection failed: {0}")]
    NotConnected(BrokerError),
    #[error("A handler is already subscribed to {0}")]
    DuplicateSubscription(String),
    #[error("Publish to {topic} failed after {attempts} attempts: {reason}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        reason: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Schema validation failed: {0}")]
    Schema(#[from] SchemaError),
    #[error("Invalid event: {0}")]
    Event(#[from] EventError),
    #[error("Broker error: {0}")]
    Broker(BrokerError),
}

impl EventBusError {
    /// Returns true when the broker could not be reached at all.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            EventBusError::NotConnected(_) => true,
            EventBusError::Broker(err) => err.is_connection_failure(),
            _ => false,
        }
    }
}

impl From<BrokerError> for EventBusError {
    fn from(err: BrokerError) -> Self {
        if err.is_connection_failure() {
            EventBusError::NotConnected(err)
        } else {
            EventBusError::Broker(err)
        }
    }
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_errors_are_classified() {
        let refused: EventBusError = BrokerError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(refused, EventBusError::NotConnected(_)));
        assert!(refused.is_connection_failure());

        let commit: EventBusError = BrokerError::CommitFailed("nope".to_string()).into();
        assert!(matches!(commit, EventBusError::Broker(_)));
        assert!(!commit.is_connection_failure());
    }

    #[test]
    fn test_display() {
        let err = EventBusError::PublishFailed {
            topic: "order.created".to_string(),
            attempts: 9,
            reason: "broker unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Publish to order.created failed after 9 attempts: broker unavailable"
        );
    }
}
