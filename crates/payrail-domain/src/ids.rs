//! Typed identifiers for the payment domain.
//!
//! Every identifier is an opaque string newtype with a constructor that
//! rejects empty input. Generated identifiers are UUID v4.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::EmptyIdentifier($label));
                }
                Ok(Self(value))
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a payment aggregate.
    PaymentId,
    "payment id"
);

string_id!(
    /// Identifier of a ledger transaction.
    TransactionId,
    "transaction id"
);

string_id!(
    /// Identifier of a saga instance.
    SagaId,
    "saga id"
);

string_id!(
    /// Identifier of a single step within a saga.
    StepId,
    "step id"
);

string_id!(
    /// Identifier of a validation attempt.
    ValidationId,
    "validation id"
);

string_id!(
    /// Identifier of a published domain event, used for consumer-side dedup.
    EventId,
    "event id"
);

string_id!(
    /// Caller-supplied token used to deduplicate payment initiation requests.
    IdempotencyKey,
    "idempotency key"
);

string_id!(
    /// Name of a clearing system a payment can be routed to, e.g. `BANKSERV_EFT`.
    ClearingSystem,
    "clearing system"
);

/// Account number in source or destination position of a payment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::EmptyIdentifier("account number"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_input() {
        assert_eq!(
            PaymentId::new(""),
            Err(DomainError::EmptyIdentifier("payment id"))
        );
        assert_eq!(
            AccountNumber::new("   "),
            Err(DomainError::EmptyIdentifier("account number"))
        );
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SagaId::generate(), SagaId::generate());
    }

    #[test]
    fn displays_inner_value() {
        let id = PaymentId::new("pay-1").unwrap();
        assert_eq!(id.to_string(), "pay-1");
        assert_eq!(id.as_str(), "pay-1");
    }
}
