use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EventCategory, EventError, EventType};

/// Data carried by user events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub user_id: Option<i64>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl UserPayload {
    pub fn new(user_id: i64, email: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            email: email.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(id) = self.user_id {
            if id <= 0 {
                return Err(format!("userId must be positive, got {}", id));
            }
        }
        if !is_valid_email(&self.email) {
            return Err(format!("email is not valid: {:?}", self.email));
        }
        if matches!(&self.username, Some(name) if name.trim().is_empty()) {
            return Err("username must not be blank".to_string());
        }
        Ok(())
    }
}

/// Data carried by product events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_stock: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_stock: Option<i64>,
}

impl ProductPayload {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            name: None,
            price: None,
            old_stock: None,
            new_stock: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_stock_change(mut self, old_stock: i64, new_stock: i64) -> Self {
        self.old_stock = Some(old_stock);
        self.new_stock = Some(new_stock);
        self
    }

    fn validate(&self, event_type: EventType) -> Result<(), String> {
        require_non_empty("productId", &self.product_id)?;
        if let Some(price) = self.price {
            require_amount("price", price)?;
        }
        for (field, stock) in [("oldStock", self.old_stock), ("newStock", self.new_stock)] {
            if matches!(stock, Some(s) if s < 0) {
                return Err(format!("{} must not be negative", field));
            }
        }
        if event_type == EventType::ProductStockUpdated && self.new_stock.is_none() {
            return Err("newStock is required".to_string());
        }
        Ok(())
    }
}

/// Data carried by order events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OrderPayload {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: None,
            total: None,
            old_status: None,
            new_status: None,
            reason: None,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_total(mut self, total: f64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_status_change(
        mut self,
        old_status: impl Into<String>,
        new_status: impl Into<String>,
    ) -> Self {
        self.old_status = Some(old_status.into());
        self.new_status = Some(new_status.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn validate(&self, event_type: EventType) -> Result<(), String> {
        require_non_empty("orderId", &self.order_id)?;
        if let Some(total) = self.total {
            require_amount("total", total)?;
        }
        match event_type {
            EventType::OrderStatusChanged => {
                require_non_empty("newStatus", self.new_status.as_deref().unwrap_or(""))
            }
            EventType::OrderCancelled => {
                require_non_empty("reason", self.reason.as_deref().unwrap_or(""))
            }
            _ => Ok(()),
        }
    }
}

/// Data carried by payment events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub payment_id: String,
    pub order_id: String,
    pub amount: f64,
    /// ISO 4217 code, e.g. `EUR`.
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PaymentPayload {
    pub fn new(
        payment_id: impl Into<String>,
        order_id: impl Into<String>,
        amount: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            payment_id: payment_id.into(),
            order_id: order_id.into(),
            amount,
            currency: currency.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn validate(&self, event_type: EventType) -> Result<(), String> {
        require_non_empty("paymentId", &self.payment_id)?;
        require_non_empty("orderId", &self.order_id)?;
        require_amount("amount", self.amount)?;
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!(
                "currency must be a 3-letter code, got {:?}",
                self.currency
            ));
        }
        if event_type == EventType::PaymentFailed {
            require_non_empty("reason", self.reason.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

/// Data carried by notification events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub notification_id: String,
    pub user_id: i64,
    /// Delivery channel, e.g. `email` or `push`.
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NotificationPayload {
    pub fn new(notification_id: impl Into<String>, user_id: i64, channel: impl Into<String>) -> Self {
        Self {
            notification_id: notification_id.into(),
            user_id,
            channel: channel.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn validate(&self) -> Result<(), String> {
        require_non_empty("notificationId", &self.notification_id)?;
        require_non_empty("channel", &self.channel)?;
        if self.user_id <= 0 {
            return Err(format!("userId must be positive, got {}", self.user_id));
        }
        Ok(())
    }
}

/// Payload of a [`DomainEvent`](super::DomainEvent), one variant per category.
///
/// Serializes as the bare payload object; parsing needs the event type to
/// know which shape to expect (see [`EventPayload::from_value`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    User(UserPayload),
    Product(ProductPayload),
    Order(OrderPayload),
    Payment(PaymentPayload),
    Notification(NotificationPayload),
}

impl EventPayload {
    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::User(_) => EventCategory::User,
            EventPayload::Product(_) => EventCategory::Product,
            EventPayload::Order(_) => EventCategory::Order,
            EventPayload::Payment(_) => EventCategory::Payment,
            EventPayload::Notification(_) => EventCategory::Notification,
        }
    }

    /// Checks that the payload fits `event_type`.
    pub fn validate_for(&self, event_type: EventType) -> Result<(), EventError> {
        let expected = event_type.category();
        if self.category() != expected {
            return Err(EventError::PayloadMismatch {
                event_type,
                expected,
                actual: self.category(),
            });
        }

        let checked = match self {
            EventPayload::User(p) => p.validate(),
            EventPayload::Product(p) => p.validate(event_type),
            EventPayload::Order(p) => p.validate(event_type),
            EventPayload::Payment(p) => p.validate(event_type),
            EventPayload::Notification(p) => p.validate(),
        };

        checked.map_err(|reason| EventError::InvalidPayload { event_type, reason })
    }

    /// Parses a JSON payload into the shape declared for `event_type`.
    pub fn from_value(event_type: EventType, value: Value) -> Result<Self, EventError> {
        let parsed = match event_type.category() {
            EventCategory::User => serde_json::from_value(value).map(EventPayload::User),
            EventCategory::Product => serde_json::from_value(value).map(EventPayload::Product),
            EventCategory::Order => serde_json::from_value(value).map(EventPayload::Order),
            EventCategory::Payment => serde_json::from_value(value).map(EventPayload::Payment),
            EventCategory::Notification => {
                serde_json::from_value(value).map(EventPayload::Notification)
            }
        };

        parsed.map_err(|e| EventError::InvalidPayload {
            event_type,
            reason: e.to_string(),
        })
    }

    pub fn as_user(&self) -> Option<&UserPayload> {
        match self {
            EventPayload::User(p) => Some(p),
            _ => None,
        }
    }
}

impl From<UserPayload> for EventPayload {
    fn from(payload: UserPayload) -> Self {
        EventPayload::User(payload)
    }
}

impl From<ProductPayload> for EventPayload {
    fn from(payload: ProductPayload) -> Self {
        EventPayload::Product(payload)
    }
}

impl From<OrderPayload> for EventPayload {
    fn from(payload: OrderPayload) -> Self {
        EventPayload::Order(payload)
    }
}

impl From<PaymentPayload> for EventPayload {
    fn from(payload: PaymentPayload) -> Self {
        EventPayload::Payment(payload)
    }
}

impl From<NotificationPayload> for EventPayload {
    fn from(payload: NotificationPayload) -> Self {
        EventPayload::Notification(payload)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    Ok(())
}

fn require_amount(field: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{} must be a non-negative number, got {}", field, value));
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
