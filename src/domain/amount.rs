//! Amount type
//!
//! Domain primitives for GSALT monetary values. Everything is kept in the
//! smallest integer unit; 100 units make one display unit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum representable amount or balance (1 trillion units)
pub const MAX_UNITS: i64 = 1_000_000_000_000;

/// Number of units in one display unit
pub const UNITS_PER_DISPLAY: i64 = 100;

/// Amount represents a validated, strictly positive number of GSALT units.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum value is [`MAX_UNITS`]
///
/// # Example
/// ```
/// use gsalt_ledger::domain::Amount;
///
/// let amount = Amount::new(10_000).unwrap();
/// assert_eq!(amount.units(), 10_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

/// Errors that can occur when creating an Amount or Balance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(i64),

    #[error("Balance cannot be negative (got {0})")]
    Negative(i64),

    #[error("Amount exceeds maximum allowed value ({MAX_UNITS})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::Overflow` if value > [`MAX_UNITS`]
    pub fn new(units: i64) -> Result<Self, AmountError> {
        if units <= 0 {
            return Err(AmountError::NotPositive(units));
        }
        if units > MAX_UNITS {
            return Err(AmountError::Overflow);
        }
        Ok(Self(units))
    }

    /// Raw unit count.
    pub fn units(&self) -> i64 {
        self.0
    }

    /// Value in display units (two decimal places).
    pub fn display_value(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Add another amount, failing on overflow.
    pub fn try_add(&self, other: Amount) -> Result<Amount, AmountError> {
        let sum = self.0.checked_add(other.0).ok_or(AmountError::Overflow)?;
        Amount::new(sum)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let units = s
            .trim()
            .parse::<i64>()
            .map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(units)
    }
}

impl TryFrom<i64> for Amount {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Balance represents an account balance in units (zero or positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Balance(i64);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(units: i64) -> Result<Self, AmountError> {
        if units < 0 {
            return Err(AmountError::Negative(units));
        }
        if units > MAX_UNITS {
            return Err(AmountError::Overflow);
        }
        Ok(Self(units))
    }

    /// Create a zero balance
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn units(&self) -> i64 {
        self.0
    }

    pub fn display_value(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Check if balance covers the given amount
    pub fn is_sufficient_for(&self, amount: Amount) -> bool {
        self.0 >= amount.units()
    }

    /// Add amount to balance
    pub fn credit(&self, amount: Amount) -> Result<Balance, AmountError> {
        let next = self.0.checked_add(amount.units()).ok_or(AmountError::Overflow)?;
        Balance::new(next)
    }

    /// Subtract amount from balance
    pub fn debit(&self, amount: Amount) -> Result<Balance, AmountError> {
        Balance::new(self.0 - amount.units())
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<i64> for Balance {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Balance::new(value)
    }
}

impl From<Balance> for i64 {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(100).unwrap();
        assert_eq!(amount.units(), 100);
    }

    #[test]
    fn test_amount_zero_rejected() {
        assert!(matches!(Amount::new(0), Err(AmountError::NotPositive(0))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        assert!(matches!(Amount::new(-5), Err(AmountError::NotPositive(-5))));
    }

    #[test]
    fn test_amount_overflow() {
        assert!(matches!(Amount::new(MAX_UNITS + 1), Err(AmountError::Overflow)));
        assert!(Amount::new(MAX_UNITS).is_ok());
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = " 2500 ".parse().unwrap();
        assert_eq!(amount.units(), 2500);
        assert!(matches!("12.5".parse::<Amount>(), Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(Amount::new(10_050).unwrap().display_value(), dec!(100.50));
        assert_eq!(Balance::new(99).unwrap().display_value(), dec!(0.99));
    }

    #[test]
    fn test_amount_serde_rejects_zero() {
        let parsed: Result<Amount, _> = serde_json::from_str("0");
        assert!(parsed.is_err());
        let parsed: Amount = serde_json::from_str("1000").unwrap();
        assert_eq!(parsed.units(), 1000);
    }

    #[test]
    fn test_balance_credit_debit() {
        let balance = Balance::zero();
        let balance = balance.credit(Amount::new(100).unwrap()).unwrap();
        assert_eq!(balance.units(), 100);

        let balance = balance.debit(Amount::new(30).unwrap()).unwrap();
        assert_eq!(balance.units(), 70);
    }

    #[test]
    fn test_balance_insufficient() {
        let balance = Balance::new(50).unwrap();
        let amount = Amount::new(100).unwrap();

        assert!(!balance.is_sufficient_for(amount));
        assert!(matches!(balance.debit(amount), Err(AmountError::Negative(-50))));
    }
}
