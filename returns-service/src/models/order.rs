//! Order models, read from the stand-in order store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Cancelled,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub status: OrderStatus,
    /// Set when this order was created to fulfil an exchange.
    pub source_return_line_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_line_id: Uuid,
    pub order_id: Uuid,
    pub sku_id: Uuid,
    pub qty: i32,
    pub unit_price: Decimal,
    pub shipped_utc: Option<DateTime<Utc>>,
}

/// Input for creating an order (seeding, or an exchange fulfilment).
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_name: String,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub sku_id: Uuid,
    pub qty: i32,
    pub unit_price: Decimal,
    pub shipped_utc: Option<DateTime<Utc>>,
}
