//! Refund arithmetic: the single place where gross, clawback and fees are
//! combined into a net amount, regardless of which caller asks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Restocking fee policy. Tagged so a "percent" value can never be read as a
/// flat amount by a caller that forgot to check a type flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RestockingFee {
    Flat(Decimal),
    Percent(Decimal),
    None,
}

impl RestockingFee {
    /// Fee amount for a given gross refund, rounded to currency precision.
    pub fn amount_for(&self, gross: Decimal) -> Decimal {
        match self {
            Self::Flat(value) => *value,
            Self::Percent(value) => (gross * *value / Decimal::from(100)).round_dp(2),
            Self::None => Decimal::ZERO,
        }
    }
}

/// Deduction components of a refund. All non-negative; the operator may
/// override any of them before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deductions {
    pub shipping: Decimal,
    pub restocking: Decimal,
    pub other: Decimal,
}

impl Deductions {
    pub const ZERO: Deductions = Deductions {
        shipping: Decimal::ZERO,
        restocking: Decimal::ZERO,
        other: Decimal::ZERO,
    };

    pub fn total(&self) -> Decimal {
        self.shipping + self.restocking + self.other
    }
}

/// Full breakdown of a refund computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundBreakdown {
    pub gross: Decimal,
    pub clawback: Decimal,
    pub deductions: Deductions,
    pub total_deductions: Decimal,
    pub net: Decimal,
}

impl RefundBreakdown {
    /// A refund may only post when the customer actually receives money.
    /// A zero or negative net is rejected by the caller, never clamped.
    pub fn is_payable(&self) -> bool {
        self.net > Decimal::ZERO
    }
}

/// `net = gross − clawback − (shipping + restocking + other)`.
pub fn compute_breakdown(gross: Decimal, clawback: Decimal, deductions: Deductions) -> RefundBreakdown {
    let total_deductions = deductions.total();
    RefundBreakdown {
        gross,
        clawback,
        deductions,
        total_deductions,
        net: gross - clawback - total_deductions,
    }
}

/// Default deductions suggested to the operator from the configured return
/// policy; every component may be overridden before submission.
pub fn suggested_deductions(
    shipping_fee: Decimal,
    restocking_fee: &RestockingFee,
    gross: Decimal,
) -> Deductions {
    Deductions {
        shipping: shipping_fee,
        restocking: restocking_fee.amount_for(gross),
        other: Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn flat_fee_ignores_gross() {
        let fee = RestockingFee::Flat(dec("75.00"));
        assert_eq!(fee.amount_for(dec("10.00")), dec("75.00"));
        assert_eq!(fee.amount_for(dec("10000.00")), dec("75.00"));
    }

    #[test]
    fn percent_fee_scales_and_rounds() {
        let fee = RestockingFee::Percent(dec("10"));
        assert_eq!(fee.amount_for(dec("1000.00")), dec("100.00"));
        assert_eq!(fee.amount_for(dec("999.99")), dec("100.00"));
    }

    #[test]
    fn no_fee_is_zero() {
        assert_eq!(RestockingFee::None.amount_for(dec("500.00")), Decimal::ZERO);
    }

    #[test]
    fn breakdown_subtracts_clawback_and_all_deductions() {
        let breakdown = compute_breakdown(
            dec("1000.00"),
            dec("100.00"),
            Deductions {
                shipping: dec("50.00"),
                restocking: Decimal::ZERO,
                other: Decimal::ZERO,
            },
        );
        assert_eq!(breakdown.total_deductions, dec("50.00"));
        assert_eq!(breakdown.net, dec("850.00"));
        assert!(breakdown.is_payable());
    }

    #[test]
    fn negative_net_is_not_payable() {
        let breakdown = compute_breakdown(
            dec("100.00"),
            dec("50.00"),
            Deductions {
                shipping: dec("60.00"),
                restocking: Decimal::ZERO,
                other: Decimal::ZERO,
            },
        );
        assert_eq!(breakdown.net, dec("-10.00"));
        assert!(!breakdown.is_payable());
    }

    #[test]
    fn zero_net_is_not_payable() {
        let breakdown = compute_breakdown(dec("100.00"), dec("100.00"), Deductions::ZERO);
        assert_eq!(breakdown.net, Decimal::ZERO);
        assert!(!breakdown.is_payable());
    }

    #[test]
    fn suggestions_come_from_policy() {
        let suggested =
            suggested_deductions(dec("49.00"), &RestockingFee::Percent(dec("5")), dec("2000.00"));
        assert_eq!(suggested.shipping, dec("49.00"));
        assert_eq!(suggested.restocking, dec("100.00"));
        assert_eq!(suggested.other, Decimal::ZERO);
    }
}
