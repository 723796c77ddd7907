use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type UserId = i64; // Telegram user id, also the customer's private chat id
pub type OrderId = i64;
pub type TopicId = i64; // forum topic id inside the manager group

/// Order lifecycle states. Closed set: anything else coming from the outside
/// (callback payloads, the database) is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    PaymentUploaded,
    PaymentConfirmed,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown order status")]
pub struct UnknownStatus;

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::PaymentUploaded => "payment_uploaded",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Customer-facing status text.
    pub fn human_text(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "Ожидает оплаты",
            OrderStatus::PaymentUploaded => "Фото загружено, проверяем",
            OrderStatus::PaymentConfirmed => "Оплата подтверждена",
            OrderStatus::InProgress => "В работе",
            OrderStatus::Completed => "Завершён",
            OrderStatus::Cancelled => "Отменён",
        }
    }

    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// States in which the customer's free-form messages are relayed to the manager.
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::PaymentConfirmed | OrderStatus::InProgress)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "payment_uploaded" => Ok(OrderStatus::PaymentUploaded),
            "payment_confirmed" => Ok(OrderStatus::PaymentConfirmed),
            "in_progress" => Ok(OrderStatus::InProgress),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(UnknownStatus),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    /// Order currently in relay mode for this user, if any. At most one.
    pub active_order_id: Option<OrderId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub service_type: String,
    pub has_parts: bool,
    pub parts_data: Option<String>, // JSON text, opaque to the store
    pub description: String,
    pub status: OrderStatus,
    pub payment_photo: Option<String>, // Telegram file_id of the proof screenshot
    pub topic_id: Option<TopicId>,
    pub price_byn: f64,
    pub price_rub: f64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Parts list decoded from the stored JSON text, if present and well-formed.
    pub fn parts(&self) -> Option<serde_json::Value> {
        self.parts_data
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Creation date truncated to the minute, as shown in listings.
    pub fn created_minute(&self) -> String {
        self.created_at.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Insert payload for the orders table. Prices are the snapshot taken by the
/// lifecycle manager at creation time, not a live lookup.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub service_type: String,
    pub has_parts: bool,
    pub parts_data: Option<String>,
    pub description: String,
    pub price_byn: f64,
    pub price_rub: f64,
}

/// Association between a manager-group forum topic and the order it serves.
/// Written once, immutable thereafter; at most one link per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicLink {
    pub topic_id: TopicId,
    pub order_id: OrderId,
    pub user_id: UserId,
}
