//! Return-window eligibility: pure derivation, re-evaluated server-side at
//! request time rather than trusted from an earlier read.

use crate::models::{OrderLine, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Eligibility verdict for one order line. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineEligibility {
    pub eligible: bool,
    /// Why the line cannot be returned; set only when `eligible` is false.
    pub reason: Option<String>,
    /// Soft flag, e.g. the window is about to close or has just lapsed.
    pub warning: Option<String>,
    pub days_remaining: Option<i64>,
}

impl LineEligibility {
    fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
            warning: None,
            days_remaining: None,
        }
    }
}

/// Evaluate one order line against the return policy.
///
/// A line is ineligible when the order is cancelled, the line never shipped,
/// it is already fully returned, or the shipment is older than the window
/// plus the trailing grace period. Inside the grace period (or close to the
/// window edge) it stays eligible but carries a warning.
pub fn evaluate_line(
    order_status: OrderStatus,
    line: &OrderLine,
    returned_qty: i64,
    window_days: i64,
    grace_days: i64,
    now: DateTime<Utc>,
) -> LineEligibility {
    if order_status == OrderStatus::Cancelled {
        return LineEligibility::ineligible("order is cancelled");
    }

    let shipped_utc = match line.shipped_utc {
        Some(t) => t,
        None => return LineEligibility::ineligible("line has not shipped"),
    };

    if returned_qty >= i64::from(line.qty) {
        return LineEligibility::ineligible("already fully returned");
    }

    let days_since_shipment = (now - shipped_utc).num_days();
    let days_remaining = window_days - days_since_shipment;

    if days_since_shipment > window_days + grace_days {
        return LineEligibility::ineligible(format!(
            "outside the {}-day return window",
            window_days
        ));
    }

    let warning = if days_remaining < 0 {
        Some(format!(
            "return window lapsed {} day(s) ago; accepted within grace period",
            -days_remaining
        ))
    } else if days_remaining <= grace_days {
        Some(format!("return window closes in {} day(s)", days_remaining))
    } else {
        None
    };

    LineEligibility {
        eligible: true,
        reason: None,
        warning,
        days_remaining: Some(days_remaining),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    const WINDOW: i64 = 30;
    const GRACE: i64 = 3;

    fn shipped_line(days_ago: i64, qty: i32, now: DateTime<Utc>) -> OrderLine {
        OrderLine {
            order_line_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            sku_id: Uuid::new_v4(),
            qty,
            unit_price: Decimal::new(99900, 2),
            shipped_utc: Some(now - Duration::days(days_ago)),
        }
    }

    #[test]
    fn cancelled_order_is_ineligible() {
        let now = Utc::now();
        let line = shipped_line(1, 2, now);
        let result = evaluate_line(OrderStatus::Cancelled, &line, 0, WINDOW, GRACE, now);
        assert!(!result.eligible);
        assert_eq!(result.reason.as_deref(), Some("order is cancelled"));
    }

    #[test]
    fn unshipped_line_is_ineligible() {
        let now = Utc::now();
        let mut line = shipped_line(1, 2, now);
        line.shipped_utc = None;
        let result = evaluate_line(OrderStatus::Open, &line, 0, WINDOW, GRACE, now);
        assert!(!result.eligible);
        assert_eq!(result.reason.as_deref(), Some("line has not shipped"));
    }

    #[test]
    fn fully_returned_line_is_ineligible() {
        let now = Utc::now();
        let line = shipped_line(5, 2, now);
        let result = evaluate_line(OrderStatus::Open, &line, 2, WINDOW, GRACE, now);
        assert!(!result.eligible);
        assert_eq!(result.reason.as_deref(), Some("already fully returned"));
    }

    #[test]
    fn fresh_shipment_is_eligible_without_warning() {
        let now = Utc::now();
        let line = shipped_line(5, 2, now);
        let result = evaluate_line(OrderStatus::Open, &line, 1, WINDOW, GRACE, now);
        assert!(result.eligible);
        assert!(result.warning.is_none());
        assert_eq!(result.days_remaining, Some(25));
    }

    #[test]
    fn near_window_edge_warns() {
        let now = Utc::now();
        let line = shipped_line(28, 1, now);
        let result = evaluate_line(OrderStatus::Open, &line, 0, WINDOW, GRACE, now);
        assert!(result.eligible);
        assert!(result.warning.is_some());
        assert_eq!(result.days_remaining, Some(2));
    }

    #[test]
    fn grace_period_is_eligible_with_warning() {
        let now = Utc::now();
        let line = shipped_line(32, 1, now);
        let result = evaluate_line(OrderStatus::Open, &line, 0, WINDOW, GRACE, now);
        assert!(result.eligible);
        assert!(result.warning.as_deref().unwrap().contains("grace"));
        assert_eq!(result.days_remaining, Some(-2));
    }

    #[test]
    fn beyond_grace_is_ineligible() {
        let now = Utc::now();
        let line = shipped_line(34, 1, now);
        let result = evaluate_line(OrderStatus::Open, &line, 0, WINDOW, GRACE, now);
        assert!(!result.eligible);
        assert_eq!(
            result.reason.as_deref(),
            Some("outside the 30-day return window")
        );
    }
}
