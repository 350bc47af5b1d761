pub mod inventory;
pub mod order;
pub mod refund;
pub mod return_line;

pub use inventory::{InventoryLedgerEntry, LedgerReason, SkuBalance, TxnType};
pub use order::{NewOrder, NewOrderLine, Order, OrderLine, OrderStatus};
pub use refund::RefundRecord;
pub use return_line::{
    ActionNeeded, ItemCondition, NewReturnLine, NewReturnRequest, PickupType, QcResult,
    ReasonCategory, Resolution, ReturnLine, ReturnStatus,
};
