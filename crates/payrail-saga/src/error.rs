use payrail_domain::{CoreError, DomainError, StoreError};
use thiserror::Error;

/// Saga subsystem errors.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Saga template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Saga '{0}' not found")]
    SagaNotFound(String),

    #[error("Payment '{0}' not found")]
    PaymentNotFound(String),

    #[error("No step handler registered for action '{0}'")]
    HandlerNotFound(String),

    #[error("TOO_MANY_IN_FLIGHT: tenant '{0}' saturated its dispatch queue")]
    TooManyInFlight(String),

    #[error("Cancellation rejected: {0}")]
    CancellationRejected(String),

    #[error("Invalid saga transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SagaError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::VersionConflict { .. }))
    }
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        Self::Core(err.into())
    }
}
