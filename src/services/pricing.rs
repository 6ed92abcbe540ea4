use crate::config::PricingConfig;
use rust_decimal::Decimal;
use serde::Serialize;

/// Order totals derived from priced line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

/// A priced line: captured unit price and quantity.
#[derive(Debug, Clone, Copy)]
pub struct PricedLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl PricedLine {
    pub fn new(unit_price: Decimal, quantity: i32) -> Self {
        Self {
            unit_price,
            quantity,
        }
    }
}

/// Computes subtotal, tax, shipping, and total for a set of priced lines.
///
/// All arithmetic is exact decimal; rounding to two places happens once at
/// the end, not per line. Shipping is free at or above the configured
/// threshold, a flat fee below it, and zero for an empty set of lines.
pub fn totals(lines: impl IntoIterator<Item = PricedLine>, cfg: &PricingConfig) -> Totals {
    let subtotal: Decimal = lines
        .into_iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum();

    let tax = subtotal * cfg.tax_rate;

    let shipping = if subtotal >= cfg.free_shipping_threshold || subtotal == Decimal::ZERO {
        Decimal::ZERO
    } else {
        cfg.flat_shipping_fee
    };

    let total = subtotal + tax + shipping;

    Totals {
        subtotal: subtotal.round_dp(2),
        tax: tax.round_dp(2),
        shipping: shipping.round_dp(2),
        total: total.round_dp(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> PricingConfig {
        PricingConfig::default()
    }

    #[test]
    fn totals_under_free_shipping_threshold() {
        let lines = vec![
            PricedLine::new(dec!(10.00), 2),
            PricedLine::new(dec!(5.00), 1),
        ];
        let totals = totals(lines, &cfg());

        assert_eq!(totals.subtotal, dec!(25.00));
        assert_eq!(totals.tax, dec!(2.50));
        assert_eq!(totals.shipping, dec!(5.00));
        assert_eq!(totals.total, dec!(32.50));
    }

    #[test]
    fn free_shipping_at_threshold() {
        let lines = vec![PricedLine::new(dec!(25.00), 2)];
        let totals = totals(lines, &cfg());

        assert_eq!(totals.subtotal, dec!(50.00));
        assert_eq!(totals.shipping, Decimal::ZERO);
        assert_eq!(totals.total, dec!(55.00));
    }

    #[test]
    fn flat_fee_just_below_threshold() {
        let lines = vec![PricedLine::new(dec!(49.99), 1)];
        let totals = totals(lines, &cfg());

        assert_eq!(totals.shipping, dec!(5.00));
        assert_eq!(totals.total, dec!(59.99));
    }

    #[test]
    fn empty_lines_cost_nothing() {
        let totals = totals(Vec::new(), &cfg());

        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.tax, Decimal::ZERO);
        assert_eq!(totals.shipping, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn rounding_happens_once_at_the_end() {
        // 3 x 0.333 = 0.999; tax 0.0999; per-line rounding would drift.
        let lines = vec![PricedLine::new(dec!(0.333), 3)];
        let totals = totals(lines, &cfg());

        assert_eq!(totals.subtotal, dec!(1.00));
        assert_eq!(totals.tax, dec!(0.10));
        // raw total = 0.999 + 0.0999 + 5 = 6.0989 -> 6.10
        assert_eq!(totals.total, dec!(6.10));
    }

    #[test]
    fn custom_rates_are_honored() {
        let cfg = PricingConfig {
            tax_rate: dec!(0.20),
            free_shipping_threshold: dec!(100),
            flat_shipping_fee: dec!(9.50),
            ..PricingConfig::default()
        };
        let totals = totals(vec![PricedLine::new(dec!(40.00), 1)], &cfg);

        assert_eq!(totals.tax, dec!(8.00));
        assert_eq!(totals.shipping, dec!(9.50));
        assert_eq!(totals.total, dec!(57.50));
    }
}
