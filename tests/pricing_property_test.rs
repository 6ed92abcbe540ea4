//! Property-based tests for the pricing calculator.
//!
//! These verify invariants across a wide range of carts, catching edge
//! cases the example-based tests miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use storefront_api::config::PricingConfig;
use storefront_api::services::{totals, PricedLine};

// Cent-precision unit prices, like the catalog stores.
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..20_000).prop_map(|cents| Decimal::new(cents as i64, 2))
}

fn line_strategy() -> impl Strategy<Value = PricedLine> {
    (price_strategy(), 1i32..50).prop_map(|(price, qty)| PricedLine::new(price, qty))
}

fn cart_strategy() -> impl Strategy<Value = Vec<PricedLine>> {
    prop::collection::vec(line_strategy(), 0..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn all_components_are_non_negative(lines in cart_strategy()) {
        let t = totals(lines, &PricingConfig::default());
        prop_assert!(t.subtotal >= Decimal::ZERO);
        prop_assert!(t.tax >= Decimal::ZERO);
        prop_assert!(t.shipping >= Decimal::ZERO);
        prop_assert!(t.total >= t.subtotal);
    }

    #[test]
    fn every_component_has_at_most_two_decimal_places(lines in cart_strategy()) {
        let t = totals(lines, &PricingConfig::default());
        for value in [t.subtotal, t.tax, t.shipping, t.total] {
            prop_assert_eq!(value, value.round_dp(2));
        }
    }

    #[test]
    fn shipping_follows_the_threshold_rule(lines in cart_strategy()) {
        let cfg = PricingConfig::default();
        let t = totals(lines, &cfg);

        if t.subtotal == Decimal::ZERO || t.subtotal >= cfg.free_shipping_threshold {
            prop_assert_eq!(t.shipping, Decimal::ZERO);
        } else {
            prop_assert_eq!(t.shipping, cfg.flat_shipping_fee);
        }
    }

    #[test]
    fn total_matches_components_within_final_rounding(lines in cart_strategy()) {
        // Rounding happens once on the raw total, so the reported total
        // may differ from the sum of the rounded components by at most
        // one cent.
        let t = totals(lines, &PricingConfig::default());
        let recomposed = t.subtotal + t.tax + t.shipping;
        let delta = (t.total - recomposed).abs();
        prop_assert!(delta <= dec!(0.01), "delta {} too large", delta);
    }

    #[test]
    fn adding_a_line_never_decreases_the_subtotal(
        lines in cart_strategy(),
        extra in line_strategy(),
    ) {
        let cfg = PricingConfig::default();
        let before = totals(lines.clone(), &cfg);
        let mut more = lines;
        more.push(extra);
        let after = totals(more, &cfg);
        prop_assert!(after.subtotal >= before.subtotal);
    }
}
