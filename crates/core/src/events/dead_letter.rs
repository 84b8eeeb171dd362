use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message that could not be processed, kept for inspection or replay.
///
/// Records are written once to the dead-letter channel and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    original_topic: String,
    event_type: String,
    original_data: Value,
    error_message: String,
    timestamp: DateTime<Utc>,
    service: String,
}

impl DeadLetterRecord {
    pub fn new(
        original_topic: impl Into<String>,
        event_type: impl Into<String>,
        original_data: Value,
        error_message: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            original_topic: original_topic.into(),
            event_type: event_type.into(),
            original_data,
            error_message: error_message.into(),
            timestamp: Utc::now(),
            service: service.into(),
        }
    }

    pub fn original_topic(&self) -> &str {
        &self.original_topic
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn original_data(&self) -> &Value {
        &self.original_data
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
