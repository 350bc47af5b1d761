//! Inventory ledger model: append-only stock movements keyed by SKU.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Movement direction; quantity is always positive, direction carries sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TxnType {
    Inward,
    Outward,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inward => "inward",
            Self::Outward => "outward",
        }
    }
}

impl std::fmt::Display for TxnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused the movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    ReturnReceived,
    Production,
    OrderAllocation,
    ManualAdjustment,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReturnReceived => "return_received",
            Self::Production => "production",
            Self::OrderAllocation => "order_allocation",
            Self::ManualAdjustment => "manual_adjustment",
        }
    }
}

/// Single ledger entry. Never mutated after insertion; the balance of a SKU
/// is the signed sum of its entries.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InventoryLedgerEntry {
    pub entry_id: Uuid,
    pub sku_id: Uuid,
    pub txn_type: TxnType,
    pub qty: i32,
    pub reason: LedgerReason,
    pub reference_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub posted_utc: DateTime<Utc>,
}

impl InventoryLedgerEntry {
    /// Signed quantity (positive inward, negative outward).
    pub fn signed_qty(&self) -> i64 {
        match self.txn_type {
            TxnType::Inward => self.qty as i64,
            TxnType::Outward => -(self.qty as i64),
        }
    }
}

/// Derived balance for one SKU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuBalance {
    pub sku_id: Uuid,
    pub balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_qty_follows_direction() {
        let mut entry = InventoryLedgerEntry {
            entry_id: Uuid::new_v4(),
            sku_id: Uuid::new_v4(),
            txn_type: TxnType::Inward,
            qty: 3,
            reason: LedgerReason::ReturnReceived,
            reference_id: None,
            created_by: None,
            posted_utc: Utc::now(),
        };
        assert_eq!(entry.signed_qty(), 3);

        entry.txn_type = TxnType::Outward;
        assert_eq!(entry.signed_qty(), -3);
    }
}
