use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use super::{DomainEvent, EventEnvelope, EventError, Headers};

/// A decoded message as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub id: String,
    pub key: Option<String>,
    pub headers: Headers,
    /// The JSON envelope, also for messages that travelled in binary form.
    pub payload: Value,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Parses the payload as a domain event envelope.
    pub fn event(&self) -> Result<DomainEvent, EventError> {
        let envelope: EventEnvelope = serde_json::from_value(self.payload.clone())
            .map_err(|e| EventError::Malformed(e.to_string()))?;
        DomainEvent::from_envelope(envelope)
    }
}

/// Processes messages of one subscribed topic.
///
/// Errors are logged by the consumer; they are not retried and do not stop
/// consumption.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self)(message.clone()).await
    }
}
