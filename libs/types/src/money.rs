//! Money value object with same-currency arithmetic
//!
//! All monetary amounts are non-negative `Decimal` values tagged with a
//! 3-letter currency code. Arithmetic is checked: mixed currencies,
//! underflow, and negative factors are rejected instead of silently
//! producing nonsense values.

use crate::error::{DomainError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable monetary value: non-negative amount plus currency code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: String,
}

impl Money {
    /// Create a new monetary value
    ///
    /// The currency code is normalized to upper case. Negative amounts and
    /// codes that are not exactly 3 ASCII letters are rejected.
    pub fn new(amount: Decimal, currency: &str) -> Result<Self> {
        if amount < Decimal::ZERO {
            return Err(DomainError::NegativeAmount { amount });
        }
        Ok(Self {
            amount,
            currency: validate_currency(currency)?,
        })
    }

    /// Zero in the given currency
    pub fn zero(currency: &str) -> Result<Self> {
        Self::new(Decimal::ZERO, currency)
    }

    /// The amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// The upper-case 3-letter currency code
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Add two amounts of the same currency
    pub fn add(&self, other: &Money) -> Result<Money> {
        self.require_same_currency(other)?;
        Money::new(self.amount + other.amount, &self.currency)
    }

    /// Subtract another amount of the same currency, rejecting underflow
    pub fn subtract(&self, other: &Money) -> Result<Money> {
        self.require_same_currency(other)?;
        if other.amount > self.amount {
            return Err(DomainError::InsufficientAmount {
                minuend: self.amount,
                subtrahend: other.amount,
            });
        }
        Money::new(self.amount - other.amount, &self.currency)
    }

    /// Multiply by a non-negative scalar factor
    pub fn multiply(&self, factor: Decimal) -> Result<Money> {
        if factor < Decimal::ZERO {
            return Err(DomainError::NegativeFactor { factor });
        }
        Money::new(self.amount * factor, &self.currency)
    }

    /// Check whether this amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    fn require_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Validate and normalize a currency code to upper case
pub fn validate_currency(code: &str) -> Result<String> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::InvalidCurrency(code.to_string()));
    }
    Ok(code.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_construction() {
        let m = Money::new(dec!(10.50), "usd").unwrap();
        assert_eq!(m.amount(), dec!(10.50));
        assert_eq!(m.currency(), "USD");

        assert!(matches!(
            Money::new(dec!(-1), "USD"),
            Err(DomainError::NegativeAmount { .. })
        ));
        assert!(matches!(
            Money::new(dec!(1), "US"),
            Err(DomainError::InvalidCurrency(_))
        ));
        assert!(matches!(
            Money::new(dec!(1), "U5D"),
            Err(DomainError::InvalidCurrency(_))
        ));
    }

    #[test]
    fn test_same_currency_arithmetic() {
        let a = Money::new(dec!(10), "USD").unwrap();
        let b = Money::new(dec!(4), "USD").unwrap();

        assert_eq!(a.add(&b).unwrap().amount(), dec!(14));
        assert_eq!(a.subtract(&b).unwrap().amount(), dec!(6));
        assert_eq!(a.multiply(dec!(2.5)).unwrap().amount(), dec!(25));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let usd = Money::new(dec!(10), "USD").unwrap();
        let eur = Money::new(dec!(10), "EUR").unwrap();

        assert!(matches!(
            usd.add(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            usd.subtract(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_underflow_and_negative_factor_rejected() {
        let a = Money::new(dec!(1), "USD").unwrap();
        let b = Money::new(dec!(2), "USD").unwrap();

        assert!(matches!(
            a.subtract(&b),
            Err(DomainError::InsufficientAmount { .. })
        ));
        assert!(matches!(
            a.multiply(dec!(-1)),
            Err(DomainError::NegativeFactor { .. })
        ));
    }
}
