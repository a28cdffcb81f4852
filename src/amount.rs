use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::ValidationError;

/// Exact decimal quantity, used both for credit units and currency amounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Amount(value)
    }

    /// Build from an integer mantissa and a decimal scale, e.g. `(15, 1)` is `1.5`.
    pub fn from_scaled(mantissa: i64, scale: u32) -> Self {
        Amount(Decimal::new(mantissa, scale))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(Decimal::from(value))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount(value)
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

/// Currency units per credit unit. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct ConversionRate(Decimal);

impl ConversionRate {
    pub const ONE: ConversionRate = ConversionRate(Decimal::ONE);

    pub fn new(rate: Decimal) -> Result<Self, ValidationError> {
        if rate <= Decimal::ZERO {
            return Err(ValidationError::InvalidConversionRate(rate));
        }
        Ok(ConversionRate(rate))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Currency value of `credits`. `None` on decimal overflow.
    pub fn to_currency(&self, credits: Amount) -> Option<Amount> {
        credits.0.checked_mul(self.0).map(Amount)
    }

    /// Credits worth `amount` of currency. `None` on decimal overflow.
    pub fn to_credits(&self, amount: Amount) -> Option<Amount> {
        amount.0.checked_div(self.0).map(Amount)
    }
}

impl Default for ConversionRate {
    fn default() -> Self {
        ConversionRate::ONE
    }
}

impl TryFrom<Decimal> for ConversionRate {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        ConversionRate::new(value)
    }
}

impl From<ConversionRate> for Decimal {
    fn from(rate: ConversionRate) -> Self {
        rate.0
    }
}

impl FromStr for ConversionRate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rate = Decimal::from_str(s.trim())
            .map_err(|_| ValidationError::MalformedRate(s.to_string()))?;
        ConversionRate::new(rate)
    }
}

impl fmt::Display for ConversionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn from_scaled_preserves_value() {
        assert_eq!(Amount::from_scaled(15, 1), amount("1.5"));
        assert_eq!(Amount::from_scaled(1, 4), amount("0.0001"));
    }

    #[test]
    fn display_is_normalized() {
        assert_eq!(amount("100.0000").to_string(), "100");
        assert_eq!(amount("1.50").to_string(), "1.5");
        assert_eq!(amount("-50.25").to_string(), "-50.25");
        assert_eq!(Amount::ZERO.to_string(), "0");
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Amount::default(), Amount::ZERO);
        assert!(Amount::default().is_zero());
        assert!(!Amount::default().is_positive());
    }

    #[test]
    fn arithmetic() {
        let mut a = Amount::from(100);
        a += Amount::from(50);
        assert_eq!(a, Amount::from(150));
        a -= Amount::from(30);
        assert_eq!(a, Amount::from(120));
        assert_eq!(a - Amount::from(200), Amount::from(-80));
    }

    #[test]
    fn sum_of_amounts() {
        let total: Amount = [1, 2, 3].into_iter().map(Amount::from).sum();
        assert_eq!(total, Amount::from(6));
    }

    #[test]
    fn negative_ordering() {
        assert!(Amount::from(-1) < Amount::ZERO);
        assert!(Amount::ZERO < Amount::from(1));
    }

    #[test]
    fn rate_rejects_non_positive() {
        assert!(ConversionRate::new(Decimal::ZERO).is_err());
        assert!(ConversionRate::new(Decimal::from(-2)).is_err());
        assert!("abc".parse::<ConversionRate>().is_err());
    }

    #[test]
    fn rate_conversions_are_exact_across_range() {
        for rate in ["0.0001", "0.5", "1", "2", "10000"] {
            let rate: ConversionRate = rate.parse().unwrap();
            let credits = amount("123.4567");
            let currency = rate.to_currency(credits).unwrap();
            assert_eq!(currency.value(), credits.value() * rate.value());
            assert_eq!(rate.to_credits(currency).unwrap(), credits);
        }
    }
}
