//! Pricing calculator
//!
//! Pure money math for subscription prices and transaction fees. All amounts
//! are `Decimal`, rounded half-up to 2 decimal places at each intermediate
//! step (fee, then VAT) rather than once at the end, so many small fee periods
//! cannot accumulate sub-cent drift.
//!
//! VAT on a transaction fee is computed on the *fee*, not on the transacted
//! total. That ordering is a correctness requirement, not a style choice.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use quickshop_shared::Plan;

use crate::settings::BillingRates;

/// Charges below this amount are "nothing to charge" for callers
pub const MINIMUM_CHARGE: Decimal = dec!(1.00);

/// VAT-inclusive subscription price breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub base: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

/// Transaction fee breakdown, VAT computed on the fee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub fee_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_fee: Decimal,
    pub applied_rate: Decimal,
}

/// Round half-up to 2 decimal places
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Monthly subscription price for a plan
///
/// A per-store override price, when present, replaces the platform default.
/// The trial plan has no subscription price.
pub fn subscription_price(
    plan: Plan,
    override_price: Option<Decimal>,
    rates: &BillingRates,
) -> PriceBreakdown {
    let base = override_price.unwrap_or(match plan {
        Plan::Trial => Decimal::ZERO,
        Plan::PlanA => rates.plan_a_price,
        Plan::PlanB => rates.plan_b_price,
    });
    let vat = round2(base * rates.vat_rate);
    PriceBreakdown {
        base,
        vat,
        total: base + vat,
    }
}

/// Platform transaction fee on a store's transacted total
///
/// A per-store override rate, when present, replaces the platform default.
pub fn transaction_fee(
    transacted_total: Decimal,
    override_rate: Option<Decimal>,
    rates: &BillingRates,
) -> FeeBreakdown {
    let applied_rate = override_rate.unwrap_or(rates.transaction_fee_rate);
    let fee_amount = round2(transacted_total * applied_rate);
    let vat_amount = round2(fee_amount * rates.vat_rate);
    FeeBreakdown {
        fee_amount,
        vat_amount,
        total_fee: fee_amount + vat_amount,
        applied_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> BillingRates {
        BillingRates {
            plan_a_price: dec!(99.00),
            plan_b_price: dec!(199.00),
            trial_days: 14,
            transaction_fee_rate: dec!(0.005),
            vat_rate: dec!(0.18),
        }
    }

    #[test]
    fn plan_prices_include_vat() {
        let p = subscription_price(Plan::PlanA, None, &rates());
        assert_eq!(p.base, dec!(99.00));
        assert_eq!(p.vat, dec!(17.82));
        assert_eq!(p.total, dec!(116.82));

        let p = subscription_price(Plan::PlanB, None, &rates());
        assert_eq!(p.base, dec!(199.00));
        assert_eq!(p.vat, dec!(35.82));
        assert_eq!(p.total, dec!(234.82));
    }

    #[test]
    fn override_price_replaces_default() {
        let p = subscription_price(Plan::PlanA, Some(dec!(49.00)), &rates());
        assert_eq!(p.base, dec!(49.00));
        assert_eq!(p.vat, dec!(8.82));
        assert_eq!(p.total, dec!(57.82));
    }

    #[test]
    fn trial_plan_costs_nothing() {
        let p = subscription_price(Plan::Trial, None, &rates());
        assert_eq!(p.total, Decimal::ZERO);
    }

    #[test]
    fn vat_is_on_the_fee_not_the_turnover() {
        // T=1000, feeRate=0.005, vatRate=0.18 -> 5.00 + 0.90 = 5.90
        let f = transaction_fee(dec!(1000), None, &rates());
        assert_eq!(f.fee_amount, dec!(5.00));
        assert_eq!(f.vat_amount, dec!(0.90));
        assert_eq!(f.total_fee, dec!(5.90));
        assert_eq!(f.applied_rate, dec!(0.005));
    }

    #[test]
    fn override_rate_replaces_default() {
        let f = transaction_fee(dec!(1000), Some(dec!(0.01)), &rates());
        assert_eq!(f.fee_amount, dec!(10.00));
        assert_eq!(f.vat_amount, dec!(1.80));
        assert_eq!(f.total_fee, dec!(11.80));
        assert_eq!(f.applied_rate, dec!(0.01));
    }

    #[test]
    fn rounding_happens_per_step() {
        // fee = 123.45 * 0.005 = 0.61725 -> 0.62 (half-up), vat on the rounded fee
        let f = transaction_fee(dec!(123.45), None, &rates());
        assert_eq!(f.fee_amount, dec!(0.62));
        assert_eq!(f.vat_amount, round2(dec!(0.62) * dec!(0.18)));
        assert_eq!(f.vat_amount, dec!(0.11));
        assert_eq!(f.total_fee, dec!(0.73));
    }

    #[test]
    fn half_up_at_the_midpoint() {
        assert_eq!(round2(dec!(0.125)), dec!(0.13));
        assert_eq!(round2(dec!(0.115)), dec!(0.12));
        assert_eq!(round2(dec!(2.005)), dec!(2.01));
    }

    #[test]
    fn zero_turnover_zero_fee() {
        let f = transaction_fee(Decimal::ZERO, None, &rates());
        assert_eq!(f.total_fee, Decimal::ZERO);
        assert!(f.total_fee < MINIMUM_CHARGE);
    }
}
