use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{EventError, USER_EVENTS_TOPIC};

/// Domain area an event belongs to. Each category has one payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    User,
    Product,
    Order,
    Payment,
    Notification,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::User => "user",
            EventCategory::Product => "product",
            EventCategory::Order => "order",
            EventCategory::Payment => "payment",
            EventCategory::Notification => "notification",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every event the services publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UserRegistered,
    UserUpdated,
    UserDeleted,
    UserLogin,
    ProductCreated,
    ProductUpdated,
    ProductDeleted,
    ProductStockUpdated,
    OrderCreated,
    OrderUpdated,
    OrderStatusChanged,
    OrderCancelled,
    PaymentProcessed,
    PaymentFailed,
    NotificationSent,
    NotificationRead,
}

impl EventType {
    pub const ALL: [EventType; 16] = [
        EventType::UserRegistered,
        EventType::UserUpdated,
        EventType::UserDeleted,
        EventType::UserLogin,
        EventType::ProductCreated,
        EventType::ProductUpdated,
        EventType::ProductDeleted,
        EventType::ProductStockUpdated,
        EventType::OrderCreated,
        EventType::OrderUpdated,
        EventType::OrderStatusChanged,
        EventType::OrderCancelled,
        EventType::PaymentProcessed,
        EventType::PaymentFailed,
        EventType::NotificationSent,
        EventType::NotificationRead,
    ];

    /// Wire tag, e.g. `order.status.changed`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::UserRegistered => "user.registered",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
            EventType::UserLogin => "user.login",
            EventType::ProductCreated => "product.created",
            EventType::ProductUpdated => "product.updated",
            EventType::ProductDeleted => "product.deleted",
            EventType::ProductStockUpdated => "product.stock.updated",
            EventType::OrderCreated => "order.created",
            EventType::OrderUpdated => "order.updated",
            EventType::OrderStatusChanged => "order.status.changed",
            EventType::OrderCancelled => "order.cancelled",
            EventType::PaymentProcessed => "payment.processed",
            EventType::PaymentFailed => "payment.failed",
            EventType::NotificationSent => "notification.sent",
            EventType::NotificationRead => "notification.read",
        }
    }

    pub fn category(self) -> EventCategory {
        match self {
            EventType::UserRegistered
            | EventType::UserUpdated
            | EventType::UserDeleted
            | EventType::UserLogin => EventCategory::User,
            EventType::ProductCreated
            | EventType::ProductUpdated
            | EventType::ProductDeleted
            | EventType::ProductStockUpdated => EventCategory::Product,
            EventType::OrderCreated
            | EventType::OrderUpdated
            | EventType::OrderStatusChanged
            | EventType::OrderCancelled => EventCategory::Order,
            EventType::PaymentProcessed | EventType::PaymentFailed => EventCategory::Payment,
            EventType::NotificationSent | EventType::NotificationRead => {
                EventCategory::Notification
            }
        }
    }

    /// Channel the event is published to when no topic is given.
    ///
    /// User events share the schema-typed `user-events` channel; every other
    /// event goes to a channel named after its wire tag.
    pub fn default_topic(self) -> &'static str {
        match self.category() {
            EventCategory::User => USER_EVENTS_TOPIC,
            _ => self.as_str(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
