//! Event bus built on the broker abstraction from `techstore_core::events`.
//!
//! An [`EventBus`] owns one broker connection. Its [`EventProducer`] publishes
//! domain events with retries and dead-letter support; each
//! [`EventConsumer`] joins the service's consumer group and dispatches
//! records to per-topic handlers.

mod bus;
mod consumer;
mod error;
mod link;
mod producer;

pub use bus::EventBus;
pub use consumer::EventConsumer;
pub use error::{EventBusError, Result};
pub use producer::{EventProducer, PublishReceipt};
