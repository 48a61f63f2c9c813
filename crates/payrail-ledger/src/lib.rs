//! Payrail transaction and ledger core.
//!
//! Double-entry ledger records and the transaction state machine
//! (`CREATED -> PROCESSING -> CLEARING -> COMPLETED | FAILED`). The signed
//! amounts of a transaction's two entries always sum to zero, and the
//! repository re-checks that invariant before accepting any write.

#![deny(unsafe_code)]

pub mod entry;
pub mod repository;
pub mod transaction;

pub use entry::{EntryType, LedgerEntry};
pub use repository::TransactionRepository;
pub use transaction::{
    CreateTransaction, LedgerError, Transaction, TransactionEvent, TransactionStatus,
};
