//! The `Payment` aggregate and the request type that creates it.

use crate::error::DomainError;
use crate::event::{Changeset, DomainEvent, EventHeader};
use crate::ids::{AccountNumber, IdempotencyKey, PaymentId};
use crate::money::Money;
use crate::tenant::TenantContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Supported payment instrument types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Eft,
    Rtc,
    Rtgs,
    Instant,
    DebitOrder,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eft => "EFT",
            Self::Rtc => "RTC",
            Self::Rtgs => "RTGS",
            Self::Instant => "INSTANT",
            Self::DebitOrder => "DEBIT_ORDER",
        }
    }
}

/// Processing priority carried by a payment; routing may override it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl PaymentPriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "NORMAL" => Some(Self::Normal),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

/// Payment lifecycle status. Transitions are monotonic; terminal payments
/// are frozen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Initiated,
    Validated,
    Clearing,
    Completed,
    Failed,
    Held,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Held)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Validated => "VALIDATED",
            Self::Clearing => "CLEARING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Held => "HELD",
        }
    }
}

/// Canonical payment initiation request entering the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub idempotency_key: IdempotencyKey,
    pub tenant: TenantContext,
    pub source_account: AccountNumber,
    pub destination_account: AccountNumber,
    pub amount: Money,
    /// Free-text payment reference. May arrive empty; the validation rule
    /// engine rejects it there so the failure is auditable.
    pub reference: String,
    pub payment_type: PaymentType,
    pub priority: PaymentPriority,
    pub initiated_by: String,
    pub metadata: BTreeMap<String, String>,
}

impl PaymentRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idempotency_key: IdempotencyKey,
        tenant: TenantContext,
        source_account: AccountNumber,
        destination_account: AccountNumber,
        amount: Money,
        reference: impl Into<String>,
        payment_type: PaymentType,
        initiated_by: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key,
            tenant,
            source_account,
            destination_account,
            amount,
            reference: reference.into(),
            payment_type,
            priority: PaymentPriority::default(),
            initiated_by: initiated_by.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: PaymentPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A payment moving through the platform. Frozen once terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub tenant: TenantContext,
    pub source_account: AccountNumber,
    pub destination_account: AccountNumber,
    pub amount: Money,
    pub reference: String,
    pub payment_type: PaymentType,
    pub priority: PaymentPriority,
    pub status: PaymentStatus,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Optimistic concurrency token, incremented by the repository on save.
    #[serde(default)]
    pub version: u64,
    #[serde(skip, default)]
    changeset: Changeset,
}

impl Payment {
    /// Create a payment from an initiation request.
    ///
    /// A payment aggregate can only exist with a positive amount and
    /// distinct accounts; request-level business rules (limits, reference,
    /// sanctions) are the validation engine's concern.
    pub fn initiate(request: &PaymentRequest) -> Result<Self, DomainError> {
        request.amount.require_positive()?;
        if request.source_account == request.destination_account {
            return Err(DomainError::SameAccount);
        }

        let payment_id = PaymentId::generate();
        let mut payment = Self {
            payment_id: payment_id.clone(),
            tenant: request.tenant.clone(),
            source_account: request.source_account.clone(),
            destination_account: request.destination_account.clone(),
            amount: request.amount.clone(),
            reference: request.reference.clone(),
            payment_type: request.payment_type,
            priority: request.priority,
            status: PaymentStatus::Initiated,
            initiated_by: request.initiated_by.clone(),
            initiated_at: Utc::now(),
            failure_reason: None,
            version: 0,
            changeset: Changeset::default(),
        };
        payment.changeset.record(DomainEvent::PaymentInitiated {
            header: EventHeader::new(payment_id.as_str()),
            payment_id,
            tenant: request.tenant.clone(),
            amount: request.amount.clone(),
        });
        Ok(payment)
    }

    pub fn mark_validated(&mut self) -> Result<(), DomainError> {
        self.advance(PaymentStatus::Initiated, PaymentStatus::Validated)?;
        self.changeset.record(DomainEvent::PaymentValidated {
            header: EventHeader::new(self.payment_id.as_str()),
            payment_id: self.payment_id.clone(),
        });
        Ok(())
    }

    pub fn start_clearing(&mut self) -> Result<(), DomainError> {
        self.advance(PaymentStatus::Validated, PaymentStatus::Clearing)
    }

    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.advance(PaymentStatus::Clearing, PaymentStatus::Completed)?;
        self.changeset.record(DomainEvent::PaymentCompleted {
            header: EventHeader::new(self.payment_id.as_str()),
            payment_id: self.payment_id.clone(),
        });
        Ok(())
    }

    /// Fail the payment from any non-terminal status.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(PaymentStatus::Failed));
        }
        let reason = reason.into();
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.clone());
        self.changeset.record(DomainEvent::PaymentFailed {
            header: EventHeader::new(self.payment_id.as_str()),
            payment_id: self.payment_id.clone(),
            reason,
        });
        Ok(())
    }

    /// Place the payment on hold following a routing decision.
    pub fn hold(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if !matches!(
            self.status,
            PaymentStatus::Initiated | PaymentStatus::Validated
        ) {
            return Err(self.transition_error(PaymentStatus::Held));
        }
        let reason = reason.into();
        self.status = PaymentStatus::Held;
        self.failure_reason = Some(reason.clone());
        self.changeset.record(DomainEvent::PaymentHeld {
            header: EventHeader::new(self.payment_id.as_str()),
            payment_id: self.payment_id.clone(),
            reason,
        });
        Ok(())
    }

    /// Routing `SET_PRIORITY` override.
    pub fn override_priority(&mut self, priority: PaymentPriority) {
        self.priority = priority;
    }

    /// Return pending domain events in emission order and clear the buffer.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.changeset.drain()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.changeset.is_empty()
    }

    fn advance(&mut self, expected: PaymentStatus, next: PaymentStatus) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(self.transition_error(next));
        }
        self.status = next;
        Ok(())
    }

    fn transition_error(&self, to: PaymentStatus) -> DomainError {
        DomainError::InvalidStatusTransition {
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }
}
