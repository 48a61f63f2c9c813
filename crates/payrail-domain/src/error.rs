use thiserror::Error;

/// Domain-level validation failures for value objects and aggregates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),

    #[error("Invalid ISO-4217 currency code '{0}'")]
    InvalidCurrency(String),

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(String),

    #[error("Source and destination accounts must differ")]
    SameAccount,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },
}

/// The platform error taxonomy. Every failure that crosses a port boundary
/// is classified into one of these variants; the saga orchestrator keys its
/// retry and compensation behaviour off the variant alone.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Timeouts, connection resets, explicit retry signals. Retried with backoff.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Validation rejections, precondition violations, authoritative NACKs.
    /// Never retried; triggers compensation.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Double-entry mismatch, illegal state transition, tenant-scope breach.
    /// The aggregate is suspect; no compensation is attempted.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A compensation action could not succeed after retries.
    #[error("Compensation failure: {0}")]
    CompensationFailure(String),
}

impl CoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Failures surfaced by repository ports.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed; another writer committed first.
    /// The losing worker aborts cleanly and must not retry blindly.
    #[error("Version conflict on {aggregate}: expected {expected}, found {actual}")]
    VersionConflict {
        aggregate: String,
        expected: u64,
        actual: u64,
    },

    /// The write violated an aggregate invariant and was refused.
    #[error("Write rejected: {0}")]
    RejectedWrite(String),

    /// An initiation request reused an idempotency key; the original
    /// payment id is carried so callers can replay the first answer.
    #[error("Idempotency key already used by payment {payment_id}")]
    DuplicateIdempotencyKey { payment_id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => CoreError::Transient(message),
            StoreError::RejectedWrite(message) => CoreError::InvariantViolation(message),
            other => CoreError::Permanent(other.to_string()),
        }
    }
}

impl From<DomainError> for CoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::CurrencyMismatch { .. } | DomainError::InvalidStatusTransition { .. } => {
                CoreError::InvariantViolation(err.to_string())
            }
            other => CoreError::Permanent(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_errors_map_to_invariant_violations() {
        let err = DomainError::InvalidStatusTransition {
            from: "COMPLETED".to_string(),
            to: "CLEARING".to_string(),
        };
        assert!(CoreError::from(err).is_invariant_violation());
    }

    #[test]
    fn validation_errors_map_to_permanent() {
        let err = DomainError::EmptyIdentifier("payment id");
        assert!(matches!(CoreError::from(err), CoreError::Permanent(_)));
    }
}
