//! Double-entry ledger records. Immutable once materialised.

use chrono::{DateTime, Utc};
use payrail_domain::{AccountNumber, DomainError, Money, TransactionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Debit,
    Credit,
}

/// One side of a double-entry pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub transaction_id: TransactionId,
    pub account: AccountNumber,
    pub entry_type: EntryType,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub entry_date: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materialise an entry, deriving `balance_after` from the entry type:
    /// a debit draws the balance down, a credit raises it.
    pub fn materialise(
        transaction_id: TransactionId,
        account: AccountNumber,
        entry_type: EntryType,
        amount: Money,
        balance_before: Money,
    ) -> Result<Self, DomainError> {
        let balance_after = match entry_type {
            EntryType::Debit => balance_before.checked_sub(&amount)?,
            EntryType::Credit => balance_before.checked_add(&amount)?,
        };
        Ok(Self {
            entry_id: Uuid::new_v4().to_string(),
            transaction_id,
            account,
            entry_type,
            amount,
            balance_before,
            balance_after,
            entry_date: Utc::now(),
        })
    }

    /// Amount with the sign of its entry type; a transaction's signed
    /// amounts sum to zero.
    pub fn signed_amount(&self) -> Money {
        match self.entry_type {
            EntryType::Debit => self.amount.negated(),
            EntryType::Credit => self.amount.clone(),
        }
    }

    /// `balance_after` must equal `balance_before` adjusted by entry type.
    pub fn balance_consistent(&self) -> bool {
        let expected = match self.entry_type {
            EntryType::Debit => self.balance_before.checked_sub(&self.amount),
            EntryType::Credit => self.balance_before.checked_add(&self.amount),
        };
        matches!(expected, Ok(expected) if expected == self.balance_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payrail_domain::Currency;
    use rust_decimal_macros::dec;

    fn zar(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::new("ZAR").unwrap())
    }

    #[test]
    fn debit_draws_down_credit_raises() {
        let txn = TransactionId::new("txn-1").unwrap();
        let debit = LedgerEntry::materialise(
            txn.clone(),
            AccountNumber::new("111").unwrap(),
            EntryType::Debit,
            zar(dec!(100)),
            zar(dec!(500)),
        )
        .unwrap();
        assert_eq!(debit.balance_after, zar(dec!(400)));
        assert!(debit.balance_consistent());

        let credit = LedgerEntry::materialise(
            txn,
            AccountNumber::new("222").unwrap(),
            EntryType::Credit,
            zar(dec!(100)),
            zar(dec!(50)),
        )
        .unwrap();
        assert_eq!(credit.balance_after, zar(dec!(150)));
        assert!(credit.balance_consistent());
    }

    #[test]
    fn signed_amounts_cancel() {
        let txn = TransactionId::new("txn-1").unwrap();
        let debit = LedgerEntry::materialise(
            txn.clone(),
            AccountNumber::new("111").unwrap(),
            EntryType::Debit,
            zar(dec!(75)),
            zar(dec!(100)),
        )
        .unwrap();
        let credit = LedgerEntry::materialise(
            txn,
            AccountNumber::new("222").unwrap(),
            EntryType::Credit,
            zar(dec!(75)),
            zar(dec!(0)),
        )
        .unwrap();
        let sum = debit
            .signed_amount()
            .checked_add(&credit.signed_amount())
            .unwrap();
        assert_eq!(sum, zar(dec!(0)));
    }

    #[test]
    fn cross_currency_balance_is_rejected() {
        let result = LedgerEntry::materialise(
            TransactionId::new("txn-1").unwrap(),
            AccountNumber::new("111").unwrap(),
            EntryType::Debit,
            zar(dec!(10)),
            Money::new(dec!(100), Currency::new("USD").unwrap()),
        );
        assert!(result.is_err());
    }
}
