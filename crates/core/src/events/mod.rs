//! Domain events and the seams of the event bus.

mod broker;
mod dead_letter;
mod error;
mod event;
mod handler;
mod payload;
pub mod schema;
mod types;

pub use broker::{Broker, BrokerRecord, Headers, OutboundRecord};
pub use dead_letter::DeadLetterRecord;
pub use error::{BrokerError, EventError, SchemaError};
pub use event::{DomainEvent, EventEnvelope, EventMetadata, EVENT_SCHEMA_VERSION};
pub use handler::{EventHandler, Message};
pub use payload::{
    EventPayload, NotificationPayload, OrderPayload, PaymentPayload, ProductPayload, UserPayload,
};
pub use types::{EventCategory, EventType};

/// Schema-typed channel shared by all user events.
pub const USER_EVENTS_TOPIC: &str = "user-events";

/// Channel receiving [`DeadLetterRecord`]s.
pub const DEAD_LETTER_TOPIC: &str = "dead-letter-queue";

/// Channel the services write audit entries to.
pub const AUDIT_LOGS_TOPIC: &str = "audit-logs";

/// Header names attached to published messages.
pub mod headers {
    pub const EVENT_TYPE: &str = "event-type";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SOURCE: &str = "source";
    pub const VERSION: &str = "version";
    pub const SOURCE_TOPIC: &str = "source-topic";
    pub const ERROR_TYPE: &str = "error-type";
}
