//! Typed records shared by the cart, the order board and the REST client.
//!
//! Remote shapes are loose (optional fields, `_id` vs `id`); the defaults are
//! applied here during deserialisation so nothing downstream has to guess.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// A product as offered by the storefront, before it is in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[serde(default, alias = "id", alias = "_id", alias = "product_id")]
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

impl CartItem {
    pub fn new(product_id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            price,
        }
    }
}

/// One line of the cart. The subtotal is always derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// Point-in-time view of the cart, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub items: Vec<CartLine>,
    pub total: f64,
    pub item_count: u32,
}

impl CartSnapshot {
    pub fn from_lines(items: &[CartLine]) -> Self {
        Self {
            items: items.to_vec(),
            total: items.iter().map(CartLine::subtotal).sum(),
            item_count: items.iter().map(|l| l.quantity).sum(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Kitchen status of an order.
///
/// `new`, `preparing` and `ready` are the active statuses shown on the board.
/// Anything the backend sends that is not recognised is kept as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    New,
    Preparing,
    Ready,
    Completed,
    Delivered,
    Cancelled,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Other(s) => s,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::Preparing | Self::Ready)
    }

    /// The only status this one may move to, if any.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            Self::New => Some(Self::Preparing),
            Self::Preparing => Some(Self::Ready),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, to: &OrderStatus) -> bool {
        self.next().as_ref() == Some(to)
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" | "pending" => Self::New,
            "preparing" | "in_progress" => Self::Preparing,
            "ready" => Self::Ready,
            "completed" => Self::Completed,
            "delivered" => Self::Delivered,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_quantity() -> u32 {
    1
}

fn default_status() -> OrderStatus {
    OrderStatus::New
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(default, alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

/// An order as read from the backend. The board never creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default, alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub order_number: String,
    #[serde(default = "default_status")]
    pub status: OrderStatus,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_total_and_count() {
        let lines = vec![
            CartLine {
                product_id: "p1".into(),
                name: "Falafel wrap".into(),
                price: 6.5,
                quantity: 2,
            },
            CartLine {
                product_id: "p2".into(),
                name: "Mint tea".into(),
                price: 2.0,
                quantity: 3,
            },
        ];
        let snap = CartSnapshot::from_lines(&lines);
        assert!((snap.total - 19.0).abs() < f64::EPSILON);
        assert_eq!(snap.item_count, 5);
    }

    #[test]
    fn status_parsing_accepts_aliases() {
        assert_eq!(OrderStatus::from("pending"), OrderStatus::New);
        assert_eq!(OrderStatus::from(" Preparing "), OrderStatus::Preparing);
        assert_eq!(OrderStatus::from("canceled"), OrderStatus::Cancelled);
        assert_eq!(
            OrderStatus::from("on_hold"),
            OrderStatus::Other("on_hold".into())
        );
        assert!(!OrderStatus::from("on_hold").is_active());
    }

    #[test]
    fn transitions_are_forward_only() {
        assert!(OrderStatus::New.can_transition_to(&OrderStatus::Preparing));
        assert!(OrderStatus::Preparing.can_transition_to(&OrderStatus::Ready));
        assert!(!OrderStatus::New.can_transition_to(&OrderStatus::Ready));
        assert!(!OrderStatus::Ready.can_transition_to(&OrderStatus::Preparing));
        assert!(!OrderStatus::Preparing.can_transition_to(&OrderStatus::New));
        assert_eq!(OrderStatus::Ready.next(), None);
    }

    #[test]
    fn order_defaults_fill_missing_fields() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "_id": "o1",
            "items": [{ "name": "Pad thai" }]
        }))
        .expect("order should parse");
        assert_eq!(order.id, "o1");
        assert_eq!(order.order_number, "");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.items[0].quantity, 1);
        assert_eq!(order.items[0].notes, None);
        assert_eq!(order.created_at, None);
    }

    #[test]
    fn status_serialises_as_plain_string() {
        let json = serde_json::to_value(OrderStatus::Preparing).unwrap();
        assert_eq!(json, serde_json::json!("preparing"));
    }
}
