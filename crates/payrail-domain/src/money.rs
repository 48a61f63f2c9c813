//! Fixed-point monetary amounts with an ISO-4217 currency code.

use crate::error::DomainError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Validated ISO-4217 currency code (three ASCII uppercase letters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self, DomainError> {
        let code = code.into();
        let valid = code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase());
        if !valid {
            return Err(DomainError::InvalidCurrency(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decimal amount in a specific currency.
///
/// Arithmetic and ordering require currency agreement; mixing currencies
/// yields `DomainError::CurrencyMismatch` instead of a silent wrong answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Require a strictly positive amount, as every payment does.
    pub fn require_positive(&self) -> Result<(), DomainError> {
        if self.is_positive() {
            Ok(())
        } else {
            Err(DomainError::NonPositiveAmount(self.amount.to_string()))
        }
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, DomainError> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency.clone()))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, DomainError> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency.clone()))
    }

    pub fn try_cmp(&self, other: &Money) -> Result<Ordering, DomainError> {
        self.require_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// Negated copy, used for the signed debit side of a ledger pair.
    pub fn negated(&self) -> Money {
        Money::new(-self.amount, self.currency.clone())
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn zar(amount: Decimal) -> Money {
        Money::new(amount, Currency::new("ZAR").unwrap())
    }

    #[test]
    fn rejects_malformed_currency_codes() {
        assert!(Currency::new("zar").is_err());
        assert!(Currency::new("ZARR").is_err());
        assert!(Currency::new("Z1R").is_err());
        assert!(Currency::new("ZAR").is_ok());
    }

    #[test]
    fn arithmetic_requires_currency_agreement() {
        let rand = zar(dec!(100));
        let dollars = Money::new(dec!(100), Currency::new("USD").unwrap());
        assert!(matches!(
            rand.checked_add(&dollars),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert_eq!(rand.checked_add(&zar(dec!(50))).unwrap(), zar(dec!(150)));
    }

    #[test]
    fn positive_amount_guard() {
        assert!(zar(dec!(0.01)).require_positive().is_ok());
        assert!(zar(dec!(0)).require_positive().is_err());
        assert!(zar(dec!(-5)).require_positive().is_err());
    }

    #[test]
    fn signed_pair_sums_to_zero() {
        let amount = zar(dec!(1000));
        let sum = amount.negated().checked_add(&amount).unwrap();
        assert_eq!(sum, zar(dec!(0)));
    }
}
