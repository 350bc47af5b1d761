//! Return line model: the unit of lifecycle tracking, and the derivation
//! of the next required operator action.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a return line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    PickupScheduled,
    InTransit,
    Received,
    Complete,
    Cancelled,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::PickupScheduled => "pickup_scheduled",
            Self::InTransit => "in_transit",
            Self::Received => "received",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the customer is returning the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReasonCategory {
    SizeIssue,
    QualityDefect,
    WrongProduct,
    ColorMismatch,
    DamagedInTransit,
    ChangedMind,
    Other,
}

/// Outcome the customer chose at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Refund,
    Exchange,
    Rejected,
}

/// Physical condition recorded when the item is received back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    Good,
    Damaged,
    Defective,
    WrongItem,
    Used,
}

impl ItemCondition {
    /// Whether the unit may re-enter sellable stock on QC approval.
    pub fn is_sellable(&self) -> bool {
        matches!(self, Self::Good)
    }
}

/// Quality-check verdict, set exactly once after the condition is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QcResult {
    Approved,
    WrittenOff,
}

/// How the item travels back to the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PickupType {
    ArrangedByUs,
    CustomerShipped,
}

/// Next required action for a line, derived from current state.
///
/// Never stored: a persisted copy of this would have to be kept in sync with
/// every transition, and the UI and automation could disagree with the true
/// state the moment one write was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionNeeded {
    SchedulePickup,
    Receive,
    AwaitingQc,
    ProcessRefund,
    CreateExchange,
    Complete,
    None,
}

impl ActionNeeded {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchedulePickup => "schedule_pickup",
            Self::Receive => "receive",
            Self::AwaitingQc => "awaiting_qc",
            Self::ProcessRefund => "process_refund",
            Self::CreateExchange => "create_exchange",
            Self::Complete => "complete",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for ActionNeeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single returned order line moving through the lifecycle.
///
/// Created by the return-request flow, mutated only through the defined
/// transitions, immutable once `complete` or `cancelled` except for `notes`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReturnLine {
    pub return_line_id: Uuid,
    pub order_id: Uuid,
    pub order_line_id: Uuid,
    pub return_batch_number: Option<String>,
    pub return_awb_number: Option<String>,
    pub return_courier: Option<String>,
    pub return_qty: i32,
    /// Snapshot of the order line's unit price at request time; the refund
    /// basis of record even if the catalog price changes later.
    pub unit_price: Decimal,
    pub reason_category: ReasonCategory,
    pub reason_detail: Option<String>,
    pub resolution: Resolution,
    pub condition: Option<ItemCondition>,
    pub qc_result: Option<QcResult>,
    pub qc_comments: Option<String>,
    pub write_off_reason: Option<String>,
    pub return_status: ReturnStatus,
    pub refund_gross_amount: Option<Decimal>,
    pub discount_clawback: Option<Decimal>,
    pub deduction_shipping: Option<Decimal>,
    pub deduction_restocking: Option<Decimal>,
    pub deduction_other: Option<Decimal>,
    pub deduction_notes: Option<String>,
    pub net_refund_amount: Option<Decimal>,
    pub refund_method: Option<String>,
    pub exchange_sku_id: Option<Uuid>,
    pub exchange_order_id: Option<Uuid>,
    pub exchange_order_number: Option<String>,
    pub notes: Option<String>,
    pub pickup_type: PickupType,
    pub requested_utc: DateTime<Utc>,
    pub received_utc: Option<DateTime<Utc>>,
    pub completed_utc: Option<DateTime<Utc>>,
}

impl ReturnLine {
    /// Derive the next required action from current state.
    ///
    /// The authoritative contract for the action queue:
    ///
    /// | status | resolution / condition | action |
    /// |---|---|---|
    /// | requested | pickup arranged by us | schedule_pickup |
    /// | requested | customer ships it | receive |
    /// | pickup_scheduled / in_transit | - | receive |
    /// | received | QC pending | awaiting_qc |
    /// | received | approved + refund | process_refund |
    /// | received | approved + exchange | create_exchange |
    /// | received | written off | complete |
    /// | complete / cancelled | - | none |
    pub fn action_needed(&self) -> ActionNeeded {
        match self.return_status {
            ReturnStatus::Complete | ReturnStatus::Cancelled => ActionNeeded::None,
            ReturnStatus::Requested => match self.pickup_type {
                PickupType::ArrangedByUs => ActionNeeded::SchedulePickup,
                PickupType::CustomerShipped => ActionNeeded::Receive,
            },
            ReturnStatus::PickupScheduled | ReturnStatus::InTransit => ActionNeeded::Receive,
            ReturnStatus::Received => match self.qc_result {
                None => ActionNeeded::AwaitingQc,
                Some(QcResult::WrittenOff) => ActionNeeded::Complete,
                Some(QcResult::Approved) => match self.resolution {
                    Resolution::Refund => ActionNeeded::ProcessRefund,
                    Resolution::Exchange => ActionNeeded::CreateExchange,
                    // Merchant rejected the request up front: nothing owed.
                    Resolution::Rejected => ActionNeeded::Complete,
                },
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.return_status,
            ReturnStatus::Complete | ReturnStatus::Cancelled
        )
    }

    /// An exchange was requested but the item failed QC; no automatic
    /// resolution exists, so the line is routed to a human after `complete`.
    pub fn needs_manual_review(&self) -> bool {
        self.resolution == Resolution::Exchange && self.qc_result == Some(QcResult::WrittenOff)
    }
}

/// Input for initiating a return request; one entry per selected order line.
#[derive(Debug, Clone)]
pub struct NewReturnRequest {
    pub order_id: Uuid,
    pub lines: Vec<NewReturnLine>,
    pub reason_category: ReasonCategory,
    pub reason_detail: Option<String>,
    pub resolution: Resolution,
    pub pickup_type: PickupType,
    pub notes: Option<String>,
    pub exchange_sku_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewReturnLine {
    pub order_line_id: Uuid,
    pub qty: i32,
}
