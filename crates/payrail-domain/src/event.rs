//! Domain events.
//!
//! One sealed sum type covers every event the core emits, with a common
//! header carrying the event id (consumer-side dedup key), the aggregate id
//! and the occurrence timestamp. Aggregates buffer events in an embedded
//! changeset that the owning repository drains exactly once per save.

use crate::ids::{EventId, PaymentId, SagaId, TransactionId};
use crate::money::Money;
use crate::tenant::TenantContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common header shared by all domain events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_id: EventId,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl EventHeader {
    pub fn new(aggregate_id: impl Into<String>) -> Self {
        Self {
            event_id: EventId::generate(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Correlation fields every saga event carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SagaEventScope {
    pub saga_id: SagaId,
    pub business_key: String,
    pub correlation_id: String,
}

/// The canonical event set referenced by the aggregates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DomainEvent {
    PaymentInitiated {
        header: EventHeader,
        payment_id: PaymentId,
        tenant: TenantContext,
        amount: Money,
    },
    PaymentValidated {
        header: EventHeader,
        payment_id: PaymentId,
    },
    PaymentHeld {
        header: EventHeader,
        payment_id: PaymentId,
        reason: String,
    },
    PaymentCompleted {
        header: EventHeader,
        payment_id: PaymentId,
    },
    PaymentFailed {
        header: EventHeader,
        payment_id: PaymentId,
        reason: String,
    },
    TransactionCreated {
        header: EventHeader,
        transaction_id: TransactionId,
        payment_id: PaymentId,
        amount: Money,
    },
    TransactionProcessing {
        header: EventHeader,
        transaction_id: TransactionId,
    },
    TransactionCleared {
        header: EventHeader,
        transaction_id: TransactionId,
        clearing_reference: String,
    },
    TransactionCompleted {
        header: EventHeader,
        transaction_id: TransactionId,
    },
    TransactionFailed {
        header: EventHeader,
        transaction_id: TransactionId,
        reason: String,
    },
    SagaStarted {
        header: EventHeader,
        scope: SagaEventScope,
        template: String,
    },
    SagaStepExecuted {
        header: EventHeader,
        scope: SagaEventScope,
        step_name: String,
    },
    SagaStepCompleted {
        header: EventHeader,
        scope: SagaEventScope,
        step_name: String,
    },
    SagaStepFailed {
        header: EventHeader,
        scope: SagaEventScope,
        step_name: String,
        reason: String,
    },
    SagaCompensationStarted {
        header: EventHeader,
        scope: SagaEventScope,
    },
    SagaStepCompensated {
        header: EventHeader,
        scope: SagaEventScope,
        step_name: String,
    },
    SagaCompensated {
        header: EventHeader,
        scope: SagaEventScope,
    },
    SagaCompleted {
        header: EventHeader,
        scope: SagaEventScope,
    },
    SagaFailed {
        header: EventHeader,
        scope: SagaEventScope,
        reason: String,
    },
}

impl DomainEvent {
    /// Stable event-type discriminant used in outbox rows and by consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentInitiated { .. } => "PaymentInitiated",
            Self::PaymentValidated { .. } => "PaymentValidated",
            Self::PaymentHeld { .. } => "PaymentHeld",
            Self::PaymentCompleted { .. } => "PaymentCompleted",
            Self::PaymentFailed { .. } => "PaymentFailed",
            Self::TransactionCreated { .. } => "TransactionCreated",
            Self::TransactionProcessing { .. } => "TransactionProcessing",
            Self::TransactionCleared { .. } => "TransactionCleared",
            Self::TransactionCompleted { .. } => "TransactionCompleted",
            Self::TransactionFailed { .. } => "TransactionFailed",
            Self::SagaStarted { .. } => "SagaStarted",
            Self::SagaStepExecuted { .. } => "SagaStepExecuted",
            Self::SagaStepCompleted { .. } => "SagaStepCompleted",
            Self::SagaStepFailed { .. } => "SagaStepFailed",
            Self::SagaCompensationStarted { .. } => "SagaCompensationStarted",
            Self::SagaStepCompensated { .. } => "SagaStepCompensated",
            Self::SagaCompensated { .. } => "SagaCompensated",
            Self::SagaCompleted { .. } => "SagaCompleted",
            Self::SagaFailed { .. } => "SagaFailed",
        }
    }

    pub fn header(&self) -> &EventHeader {
        match self {
            Self::PaymentInitiated { header, .. }
            | Self::PaymentValidated { header, .. }
            | Self::PaymentHeld { header, .. }
            | Self::PaymentCompleted { header, .. }
            | Self::PaymentFailed { header, .. }
            | Self::TransactionCreated { header, .. }
            | Self::TransactionProcessing { header, .. }
            | Self::TransactionCleared { header, .. }
            | Self::TransactionCompleted { header, .. }
            | Self::TransactionFailed { header, .. }
            | Self::SagaStarted { header, .. }
            | Self::SagaStepExecuted { header, .. }
            | Self::SagaStepCompleted { header, .. }
            | Self::SagaStepFailed { header, .. }
            | Self::SagaCompensationStarted { header, .. }
            | Self::SagaStepCompensated { header, .. }
            | Self::SagaCompensated { header, .. }
            | Self::SagaCompleted { header, .. }
            | Self::SagaFailed { header, .. } => header,
        }
    }
}

/// Embedded pending-event buffer for aggregates.
///
/// Not serialized: events are drained by the repository at save time and
/// forwarded to the outbox in the same write, so a reloaded aggregate never
/// carries stale pending events.
#[derive(Clone, Debug, Default)]
pub struct Changeset {
    events: Vec<DomainEvent>,
}

impl Changeset {
    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Return the pending events in emission order and clear the buffer.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
