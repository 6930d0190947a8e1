//! Monetary amounts in minor currency units.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::DomainError;

/// Largest accepted difference between a claimed amount and the bill total
/// (one minor unit, i.e. 0.01 of the currency).
pub const AMOUNT_TOLERANCE: i64 = 1;

/// Largest minor-unit count an `f64` represents exactly.
const MAX_EXACT_MINOR: i64 = (1 << 53) - 1;

/// Money amount stored in the smallest unit of the currency (kopecks, cents).
///
/// Integer arithmetic avoids the floating-point drift a sum of bills would
/// otherwise accumulate. On the wire the amount is a decimal number of
/// currency units (`1500.00`), converted exactly: more than two fractional
/// digits are rejected rather than rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[schema(value_type = f64, example = 1500.00)]
pub struct Money(i64);

impl Money {
    /// Creates a new Money value.
    pub fn new(amount: i64) -> Result<Self, DomainError> {
        if amount < 0 {
            return Err(DomainError::NegativeAmount);
        }
        Ok(Self(amount))
    }

    /// Creates a zero amount.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Converts a decimal amount of currency units (`1500.05`) exactly.
    pub fn from_major(value: f64) -> Result<Self, DomainError> {
        if !value.is_finite() {
            return Err(DomainError::ValidationError(
                "Amount must be a finite number".into(),
            ));
        }
        let minor = (value * 100.0).round();
        if minor.abs() > MAX_EXACT_MINOR as f64 {
            return Err(DomainError::AmountOverflow);
        }
        if minor / 100.0 != value {
            return Err(DomainError::ValidationError(
                "Amount must have at most two decimal places".into(),
            ));
        }
        Money::new(minor as i64)
    }

    /// The amount in currency units.
    pub fn to_major(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns the amount in minor units.
    pub fn amount(&self) -> i64 {
        self.0
    }

    /// Returns true for a zero amount.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Overflow-checked addition.
    pub fn checked_add(&self, other: Money) -> Result<Money, DomainError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(DomainError::AmountOverflow)
    }

    /// Sums a sequence of amounts.
    pub fn sum<I>(amounts: I) -> Result<Money, DomainError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }

    /// Returns true if the two amounts differ by at most `tolerance` minor units.
    pub fn within(&self, other: &Money, tolerance: i64) -> bool {
        self.0.abs_diff(other.0) <= tolerance.unsigned_abs()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Parses a decimal string of currency units (`"1500"`, `"1500.5"`, `"1500.05"`).
impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::ValidationError(format!("Invalid amount: {:?}", s));
        let s = s.trim();
        if s.starts_with('-') {
            return Err(DomainError::NegativeAmount);
        }

        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if fraction.len() > 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::ValidationError(
                "Amount must have at most two decimal places".into(),
            ));
        }

        let whole: i64 = whole.parse().map_err(|_| DomainError::AmountOverflow)?;
        let cents = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse::<i64>().map_err(|_| invalid())?,
        };
        whole
            .checked_mul(100)
            .and_then(|m| m.checked_add(cents))
            .ok_or(DomainError::AmountOverflow)
            .and_then(Money::new)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

struct MoneyVisitor;

impl Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative amount with at most two decimal places")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(100))
            .ok_or_else(|| E::custom(DomainError::AmountOverflow))
            .and_then(|minor| Money::new(minor).map_err(E::custom))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
        v.checked_mul(100)
            .ok_or_else(|| E::custom(DomainError::AmountOverflow))
            .and_then(|minor| Money::new(minor).map_err(E::custom))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
        Money::from_major(v).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
        v.parse().map_err(E::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_creation() {
        let money = Money::new(150000).unwrap();
        assert_eq!(money.amount(), 150000);
    }

    #[test]
    fn test_negative_money_fails() {
        let result = Money::new(-100);
        assert!(matches!(result, Err(DomainError::NegativeAmount)));
    }

    #[test]
    fn test_sum() {
        let total = Money::sum([Money::new(100).unwrap(), Money::new(250).unwrap()]).unwrap();
        assert_eq!(total.amount(), 350);
        assert_eq!(Money::sum([]).unwrap(), Money::zero());
    }

    #[test]
    fn test_sum_overflow() {
        let result = Money::sum([Money::new(i64::MAX).unwrap(), Money::new(1).unwrap()]);
        assert!(matches!(result, Err(DomainError::AmountOverflow)));
    }

    #[test]
    fn test_within_tolerance() {
        let bills = Money::new(150000).unwrap();
        assert!(bills.within(&Money::new(150001).unwrap(), AMOUNT_TOLERANCE));
        assert!(bills.within(&Money::new(149999).unwrap(), AMOUNT_TOLERANCE));
        assert!(!bills.within(&Money::new(140000).unwrap(), AMOUNT_TOLERANCE));
        assert!(!bills.within(&Money::new(150002).unwrap(), AMOUNT_TOLERANCE));
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::new(150000).unwrap().to_string(), "1500.00");
        assert_eq!(Money::new(1050).unwrap().to_string(), "10.50");
        assert_eq!(Money::new(7).unwrap().to_string(), "0.07");
    }

    #[test]
    fn test_from_major_is_exact() {
        assert_eq!(Money::from_major(1500.0).unwrap().amount(), 150000);
        assert_eq!(Money::from_major(1500.05).unwrap().amount(), 150005);
        assert_eq!(Money::from_major(0.07).unwrap().amount(), 7);
        assert_eq!(Money::from_major(19.99).unwrap().amount(), 1999);
    }

    #[test]
    fn test_from_major_rejects_sub_cent_values() {
        assert!(matches!(
            Money::from_major(1500.001),
            Err(DomainError::ValidationError(_))
        ));
        assert!(matches!(
            Money::from_major(0.1 + 0.2),
            Err(DomainError::ValidationError(_))
        ));
        assert!(Money::from_major(f64::NAN).is_err());
        assert!(matches!(
            Money::from_major(-1.0),
            Err(DomainError::NegativeAmount)
        ));
        assert!(matches!(
            Money::from_major(1e300),
            Err(DomainError::AmountOverflow)
        ));
    }

    #[test]
    fn test_parse_decimal_string() {
        assert_eq!("1500".parse::<Money>().unwrap().amount(), 150000);
        assert_eq!("1500.5".parse::<Money>().unwrap().amount(), 150050);
        assert_eq!("1500.05".parse::<Money>().unwrap().amount(), 150005);
        assert!("1500.005".parse::<Money>().is_err());
        assert!("15a0".parse::<Money>().is_err());
        assert!(".50".parse::<Money>().is_err());
        assert!(matches!(
            "-3".parse::<Money>(),
            Err(DomainError::NegativeAmount)
        ));
    }

    #[test]
    fn test_wire_amount_is_currency_units() {
        let money: Money = serde_json::from_str("1500.00").unwrap();
        assert_eq!(money.amount(), 150000);
        let money: Money = serde_json::from_str("1500").unwrap();
        assert_eq!(money.amount(), 150000);
        let money: Money = serde_json::from_str("\"99.90\"").unwrap();
        assert_eq!(money.amount(), 9990);

        assert_eq!(
            serde_json::to_value(Money::new(150005).unwrap()).unwrap(),
            serde_json::json!(1500.05)
        );
    }

    #[test]
    fn test_wire_amount_rejects_inexact_values() {
        assert!(serde_json::from_str::<Money>("1500.001").is_err());
        assert!(serde_json::from_str::<Money>("-5").is_err());
        assert!(serde_json::from_str::<Money>("true").is_err());
    }
}
