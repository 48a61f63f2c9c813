//! Payrail domain model.
//!
//! Value objects, the `Payment` aggregate, the sealed domain-event log and
//! the outbox primitives shared by every other core crate. Aggregates are
//! plain data plus behaviour; persistence is behind repository ports.

#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod ids;
pub mod money;
pub mod outbox;
pub mod payment;
pub mod tenant;

pub use error::{CoreError, DomainError, StoreError};
pub use event::{Changeset, DomainEvent, EventHeader, SagaEventScope};
pub use ids::{
    AccountNumber, ClearingSystem, EventId, IdempotencyKey, PaymentId, SagaId, StepId,
    TransactionId, ValidationId,
};
pub use money::{Currency, Money};
pub use outbox::{EventPublisher, OutboxRecord};
pub use payment::{Payment, PaymentPriority, PaymentRequest, PaymentStatus, PaymentType};
pub use tenant::TenantContext;
