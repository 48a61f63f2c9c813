//! The `Transaction` aggregate and its state machine.

use crate::entry::{EntryType, LedgerEntry};
use chrono::{DateTime, Utc};
use payrail_domain::{
    Changeset, ClearingSystem, CoreError, DomainEvent, EventHeader, Money, PaymentId,
    TenantContext, TransactionId,
};
use payrail_domain::{AccountNumber, DomainError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Invalid transaction state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Double-entry violation: {0}")]
    DoubleEntryViolation(String),

    #[error("{0}")]
    Domain(#[from] DomainError),
}

impl From<LedgerError> for CoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Domain(domain) => domain.into(),
            other => CoreError::InvariantViolation(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Created,
    Processing,
    Clearing,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Processing => "PROCESSING",
            Self::Clearing => "CLEARING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Sequence-numbered audit record of one transaction state change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub sequence: u64,
    pub event_type: String,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// Inputs for creating a transaction.
#[derive(Clone, Debug)]
pub struct CreateTransaction {
    pub payment_id: PaymentId,
    pub tenant: TenantContext,
    pub debit_account: AccountNumber,
    pub credit_account: AccountNumber,
    pub amount: Money,
    pub debit_opening_balance: Money,
    pub credit_opening_balance: Money,
}

/// A double-entry transaction. Exactly one DEBIT and one CREDIT entry,
/// signed amounts summing to zero, from creation to the grave.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub payment_id: PaymentId,
    pub tenant: TenantContext,
    pub debit_account: AccountNumber,
    pub credit_account: AccountNumber,
    pub amount: Money,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clearing_system: Option<ClearingSystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clearing_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub ledger_entries: Vec<LedgerEntry>,
    pub events: Vec<TransactionEvent>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token, incremented by the repository on save.
    #[serde(default)]
    pub version: u64,
    #[serde(skip, default)]
    changeset: Changeset,
}

impl Transaction {
    /// Create a transaction and immediately materialise its ledger pair.
    pub fn create(params: CreateTransaction) -> Result<Self, LedgerError> {
        params.amount.require_positive()?;
        if params.debit_account == params.credit_account {
            return Err(DomainError::SameAccount.into());
        }

        let transaction_id = TransactionId::generate();
        let debit_entry = LedgerEntry::materialise(
            transaction_id.clone(),
            params.debit_account.clone(),
            EntryType::Debit,
            params.amount.clone(),
            params.debit_opening_balance,
        )?;
        let credit_entry = LedgerEntry::materialise(
            transaction_id.clone(),
            params.credit_account.clone(),
            EntryType::Credit,
            params.amount.clone(),
            params.credit_opening_balance,
        )?;

        let mut transaction = Self {
            transaction_id: transaction_id.clone(),
            payment_id: params.payment_id.clone(),
            tenant: params.tenant,
            debit_account: params.debit_account,
            credit_account: params.credit_account,
            amount: params.amount.clone(),
            status: TransactionStatus::Created,
            clearing_system: None,
            clearing_reference: None,
            failure_reason: None,
            ledger_entries: vec![debit_entry, credit_entry],
            events: Vec::new(),
            created_at: Utc::now(),
            version: 0,
            changeset: Changeset::default(),
        };
        transaction.record("transaction_created", "Ledger pair materialised");
        transaction.changeset.record(DomainEvent::TransactionCreated {
            header: EventHeader::new(transaction_id.as_str()),
            transaction_id,
            payment_id: params.payment_id,
            amount: params.amount,
        });
        transaction.verify_double_entry()?;
        Ok(transaction)
    }

    pub fn start_processing(&mut self) -> Result<(), LedgerError> {
        self.advance(TransactionStatus::Created, TransactionStatus::Processing)?;
        self.record("processing_started", "Transaction processing started");
        self.changeset.record(DomainEvent::TransactionProcessing {
            header: EventHeader::new(self.transaction_id.as_str()),
            transaction_id: self.transaction_id.clone(),
        });
        Ok(())
    }

    pub fn mark_cleared(
        &mut self,
        clearing_system: ClearingSystem,
        clearing_reference: impl Into<String>,
    ) -> Result<(), LedgerError> {
        self.advance(TransactionStatus::Processing, TransactionStatus::Clearing)?;
        let clearing_reference = clearing_reference.into();
        self.clearing_system = Some(clearing_system);
        self.clearing_reference = Some(clearing_reference.clone());
        self.record(
            "submitted_to_clearing",
            format!("Accepted by clearing as {clearing_reference}"),
        );
        self.changeset.record(DomainEvent::TransactionCleared {
            header: EventHeader::new(self.transaction_id.as_str()),
            transaction_id: self.transaction_id.clone(),
            clearing_reference,
        });
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), LedgerError> {
        self.advance(TransactionStatus::Clearing, TransactionStatus::Completed)?;
        self.record("completed", "Transaction settled");
        self.changeset.record(DomainEvent::TransactionCompleted {
            header: EventHeader::new(self.transaction_id.as_str()),
            transaction_id: self.transaction_id.clone(),
        });
        Ok(())
    }

    /// Fail from any non-terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(TransactionStatus::Failed));
        }
        let reason = reason.into();
        self.status = TransactionStatus::Failed;
        self.failure_reason = Some(reason.clone());
        self.record("failed", reason.clone());
        self.changeset.record(DomainEvent::TransactionFailed {
            header: EventHeader::new(self.transaction_id.as_str()),
            transaction_id: self.transaction_id.clone(),
            reason,
        });
        Ok(())
    }

    /// The double-entry invariant. Checked at creation and again by the
    /// repository before it accepts any write.
    pub fn verify_double_entry(&self) -> Result<(), LedgerError> {
        if self.ledger_entries.len() != 2 {
            return Err(LedgerError::DoubleEntryViolation(format!(
                "expected exactly 2 ledger entries, found {}",
                self.ledger_entries.len()
            )));
        }
        let debits = self
            .ledger_entries
            .iter()
            .filter(|entry| entry.entry_type == EntryType::Debit)
            .count();
        if debits != 1 {
            return Err(LedgerError::DoubleEntryViolation(format!(
                "expected exactly 1 debit entry, found {debits}"
            )));
        }

        let mut sum = Decimal::ZERO;
        for entry in &self.ledger_entries {
            if entry.amount.currency() != self.amount.currency() {
                return Err(LedgerError::DoubleEntryViolation(format!(
                    "entry currency {} differs from transaction currency {}",
                    entry.amount.currency(),
                    self.amount.currency()
                )));
            }
            if !entry.balance_consistent() {
                return Err(LedgerError::DoubleEntryViolation(format!(
                    "entry {} balance derivation is inconsistent",
                    entry.entry_id
                )));
            }
            sum += entry.signed_amount().amount();
        }
        if sum != Decimal::ZERO {
            return Err(LedgerError::DoubleEntryViolation(format!(
                "signed amounts sum to {sum}, expected 0"
            )));
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.changeset.drain()
    }

    fn advance(
        &mut self,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<(), LedgerError> {
        if self.status != expected {
            return Err(self.transition_error(next));
        }
        self.status = next;
        Ok(())
    }

    fn transition_error(&self, to: TransactionStatus) -> LedgerError {
        LedgerError::InvalidStateTransition {
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    fn record(&mut self, event_type: impl Into<String>, detail: impl Into<String>) {
        self.events.push(TransactionEvent {
            sequence: self.events.len() as u64,
            event_type: event_type.into(),
            detail: detail.into(),
            occurred_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payrail_domain::Currency;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn zar(amount: Decimal) -> Money {
        Money::new(amount, Currency::new("ZAR").unwrap())
    }

    fn make_params(amount: Decimal) -> CreateTransaction {
        CreateTransaction {
            payment_id: PaymentId::new("pay-1").unwrap(),
            tenant: TenantContext::new("T1").unwrap().with_business_unit("B1"),
            debit_account: AccountNumber::new("12345678901").unwrap(),
            credit_account: AccountNumber::new("98765432101").unwrap(),
            amount: zar(amount),
            debit_opening_balance: zar(dec!(1000000)),
            credit_opening_balance: zar(dec!(0)),
        }
    }

    #[test]
    fn create_materialises_balanced_pair() {
        let txn = Transaction::create(make_params(dec!(1000))).unwrap();
        assert_eq!(txn.status, TransactionStatus::Created);
        assert_eq!(txn.ledger_entries.len(), 2);
        assert!(txn.verify_double_entry().is_ok());
        assert_eq!(txn.ledger_entries[0].balance_after, zar(dec!(999000)));
        assert_eq!(txn.ledger_entries[1].balance_after, zar(dec!(1000)));
    }

    #[test]
    fn rejects_self_transfer_and_zero_amount() {
        let mut params = make_params(dec!(100));
        params.credit_account = params.debit_account.clone();
        assert!(Transaction::create(params).is_err());
        assert!(Transaction::create(make_params(dec!(0))).is_err());
    }

    #[test]
    fn state_machine_happy_path() {
        let mut txn = Transaction::create(make_params(dec!(100))).unwrap();
        txn.start_processing().unwrap();
        txn.mark_cleared(ClearingSystem::new("BANKSERV_EFT").unwrap(), "CLR-1")
            .unwrap();
        txn.complete().unwrap();
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.clearing_reference.as_deref(), Some("CLR-1"));

        let kinds: Vec<_> = txn.drain_events().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "TransactionCreated",
                "TransactionProcessing",
                "TransactionCleared",
                "TransactionCompleted"
            ]
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut txn = Transaction::create(make_params(dec!(100))).unwrap();
        assert!(matches!(
            txn.complete(),
            Err(LedgerError::InvalidStateTransition { .. })
        ));
        assert!(txn
            .mark_cleared(ClearingSystem::new("SAMOS").unwrap(), "CLR-9")
            .is_err());
    }

    #[test]
    fn fail_is_rejected_from_terminal_states() {
        let mut txn = Transaction::create(make_params(dec!(100))).unwrap();
        txn.fail("clearing rejected").unwrap();
        assert_eq!(txn.status, TransactionStatus::Failed);
        assert!(txn.fail("again").is_err());

        let mut done = Transaction::create(make_params(dec!(100))).unwrap();
        done.start_processing().unwrap();
        done.mark_cleared(ClearingSystem::new("SAMOS").unwrap(), "CLR-2")
            .unwrap();
        done.complete().unwrap();
        assert!(done.fail("too late").is_err());
    }

    #[test]
    fn event_sequence_is_monotonic() {
        let mut txn = Transaction::create(make_params(dec!(100))).unwrap();
        txn.start_processing().unwrap();
        txn.fail("nack").unwrap();
        let sequences: Vec<_> = txn.events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn tampered_entries_fail_verification() {
        let mut txn = Transaction::create(make_params(dec!(100))).unwrap();
        txn.ledger_entries[1].balance_after = zar(dec!(999));
        assert!(matches!(
            txn.verify_double_entry(),
            Err(LedgerError::DoubleEntryViolation(_))
        ));

        let mut dropped = Transaction::create(make_params(dec!(100))).unwrap();
        dropped.ledger_entries.pop();
        assert!(dropped.verify_double_entry().is_err());
    }

    proptest! {
        /// Money conservation: for any positive amount and opening balances,
        /// the signed ledger amounts cancel and balances derive correctly.
        #[test]
        fn prop_signed_amounts_always_sum_to_zero(
            cents in 1i64..1_000_000_000,
            debit_open in 0i64..1_000_000_000,
            credit_open in 0i64..1_000_000_000,
        ) {
            let mut params = make_params(Decimal::new(cents, 2));
            params.debit_opening_balance = zar(Decimal::new(debit_open, 2));
            params.credit_opening_balance = zar(Decimal::new(credit_open, 2));

            let txn = Transaction::create(params).unwrap();
            prop_assert!(txn.verify_double_entry().is_ok());

            let sum: Decimal = txn
                .ledger_entries
                .iter()
                .map(|entry| entry.signed_amount().amount())
                .sum();
            prop_assert_eq!(sum, Decimal::ZERO);
        }
    }
}
