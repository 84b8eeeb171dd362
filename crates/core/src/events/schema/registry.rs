use std::collections::HashMap;
use std::sync::Arc;

use super::{user_event_schema, RecordSchema};
use crate::events::USER_EVENTS_TOPIC;

/// Maps channels to the binary schema their messages use.
///
/// Channels without a schema carry JSON envelopes.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<RecordSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `UserEvent` schema bound to `user-events`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(USER_EVENTS_TOPIC, user_event_schema());
        registry
    }

    /// Binds `schema` to `topic`, replacing any previous binding.
    pub fn register(&mut self, topic: impl Into<String>, schema: RecordSchema) {
        self.schemas.insert(topic.into(), Arc::new(schema));
    }

    pub fn get(&self, topic: &str) -> Option<Arc<RecordSchema>> {
        self.schemas.get(topic).cloned()
    }

    pub fn is_schema_topic(&self, topic: &str) -> bool {
        self.schemas.contains_key(topic)
    }
}
