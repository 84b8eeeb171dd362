mod codec;
mod registry;
mod user_event;

pub use codec::{FieldKind, FieldSchema, RecordSchema};
pub use registry::SchemaRegistry;
pub use user_event::{user_event_envelope, user_event_record, user_event_schema, USER_EVENT_SOURCE};
