use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Scales a decimal amount to minor units (cents), rounding half away from zero.
pub fn decimal_to_minor(value: Decimal) -> Option<i64> {
    (value * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Renders minor units as `-1234.56 BRL`.
pub fn format_minor(minor: i64, currency: &str) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02} {currency}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decimal_to_minor_exact() {
        let d = Decimal::from_str("1234.56").unwrap();
        assert_eq!(decimal_to_minor(d), Some(123456));
    }

    #[test]
    fn decimal_to_minor_rounds_half_away_from_zero() {
        assert_eq!(decimal_to_minor(Decimal::from_str("0.005").unwrap()), Some(1));
        assert_eq!(decimal_to_minor(Decimal::from_str("-0.005").unwrap()), Some(-1));
        assert_eq!(decimal_to_minor(Decimal::from_str("2.675").unwrap()), Some(268));
    }

    #[test]
    fn format_minor_negative() {
        assert_eq!(format_minor(-123456, "BRL"), "-1234.56 BRL");
        assert_eq!(format_minor(5, "USD"), "0.05 USD");
    }
}
