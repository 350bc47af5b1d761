//! Refund record model: one per refunded return line.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The money event for a refunded line. `return_line_id` is unique in the
/// database, so a line can never accumulate a second non-voided refund.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefundRecord {
    pub refund_id: Uuid,
    pub return_line_id: Uuid,
    pub gross_amount: Decimal,
    pub discount_clawback: Decimal,
    pub deduction_shipping: Decimal,
    pub deduction_restocking: Decimal,
    pub deduction_other: Decimal,
    pub deduction_notes: Option<String>,
    pub net_amount: Decimal,
    pub refund_method: String,
    pub voided: bool,
    pub processed_by: Option<Uuid>,
    pub processed_utc: DateTime<Utc>,
}
