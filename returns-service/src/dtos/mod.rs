//! Request/response payloads for the HTTP surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    ActionNeeded, InventoryLedgerEntry, ItemCondition, Order, OrderLine, PickupType, QcResult,
    ReasonCategory, RefundRecord, Resolution, ReturnLine, SkuBalance,
};
use crate::services::eligibility::LineEligibility;
use crate::services::fees::RefundBreakdown;

// -------------------------------------------------------------------------
// Orders
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 32))]
    pub order_number: String,
    #[validate(length(min = 1, max = 255))]
    pub customer_name: String,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<CreateOrderLineRequest>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderLineRequest {
    pub sku_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
    pub unit_price: Decimal,
    pub shipped_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

/// One order line annotated for return entry.
#[derive(Debug, Serialize)]
pub struct ReturnableLineResponse {
    #[serde(flatten)]
    pub line: OrderLine,
    pub already_returned_qty: i64,
    pub eligibility: LineEligibility,
}

#[derive(Debug, Serialize)]
pub struct OrderReturnabilityResponse {
    pub order: Order,
    pub lines: Vec<ReturnableLineResponse>,
}

// -------------------------------------------------------------------------
// Return request / lines
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReturnRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "At least one line must be selected"))]
    pub lines: Vec<ReturnLineSelection>,
    pub reason_category: ReasonCategory,
    pub reason_detail: Option<String>,
    pub resolution: Resolution,
    pub pickup_type: PickupType,
    pub notes: Option<String>,
    pub exchange_sku_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReturnLineSelection {
    pub order_line_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
}

/// A return line plus its derived queue fields. `action_needed` is computed
/// on the way out and never stored.
#[derive(Debug, Serialize)]
pub struct ReturnLineResponse {
    #[serde(flatten)]
    pub line: ReturnLine,
    pub action_needed: ActionNeeded,
    pub needs_manual_review: bool,
}

impl From<ReturnLine> for ReturnLineResponse {
    fn from(line: ReturnLine) -> Self {
        let action_needed = line.action_needed();
        let needs_manual_review = line.needs_manual_review();
        Self {
            line,
            action_needed,
            needs_manual_review,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InitiateReturnResponse {
    pub lines: Vec<ReturnLineResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ListReturnsQuery {
    /// `open` (default) or `all`.
    pub status: Option<String>,
    pub order_id: Option<Uuid>,
}

// -------------------------------------------------------------------------
// Transitions
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct SchedulePickupRequest {
    #[validate(length(min = 1, max = 64))]
    pub courier: String,
    #[validate(length(min = 1, max = 64))]
    pub awb_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchSchedulePickupRequest {
    #[validate(length(min = 1))]
    pub return_line_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub courier: String,
    #[validate(length(min = 1, max = 64))]
    pub awb_number: String,
}

#[derive(Debug, Serialize)]
pub struct BatchLineOutcome {
    pub return_line_id: Uuid,
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<ReturnLineResponse>,
}

#[derive(Debug, Serialize)]
pub struct BatchScheduleResponse {
    pub batch_number: String,
    pub outcomes: Vec<BatchLineOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub condition: ItemCondition,
}

#[derive(Debug, Deserialize)]
pub struct QcRequest {
    pub decision: QcResult,
    pub comments: Option<String>,
    pub write_off_reason: Option<String>,
    pub operator_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct QcResponse {
    pub line: ReturnLineResponse,
    /// Present only when the decision re-entered stock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory_entry: Option<InventoryLedgerEntry>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    pub gross_amount: Decimal,
    #[serde(default)]
    pub discount_clawback: Decimal,
    #[serde(default)]
    pub shipping_fee: Decimal,
    #[serde(default)]
    pub restocking_fee: Decimal,
    #[serde(default)]
    pub other_deductions: Decimal,
    pub deduction_notes: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub refund_method: String,
    pub processed_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub line: ReturnLineResponse,
    pub refund: RefundRecord,
}

#[derive(Debug, Deserialize)]
pub struct RefundPreviewQuery {
    /// Defaults to the line's snapshot price times returned quantity.
    pub gross: Option<Decimal>,
    pub discount_clawback: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct RefundPreviewResponse {
    #[serde(flatten)]
    pub breakdown: RefundBreakdown,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub line: ReturnLineResponse,
    pub exchange_order: Order,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotesRequest {
    pub notes: Option<String>,
}

// -------------------------------------------------------------------------
// Inventory
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BalancesQuery {
    /// Comma-separated SKU ids.
    pub sku_ids: String,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub balances: Vec<SkuBalance>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub sku_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub entries: Vec<InventoryLedgerEntry>,
}
