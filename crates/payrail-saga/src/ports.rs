//! Outbound ports the saga drives and the repository ports it persists
//! through. All step-facing operations are idempotent keyed by
//! `(saga_id, step_id)`; the orchestrator provides that pair on every call.

use crate::instance::SagaInstance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use payrail_domain::{
    AccountNumber, ClearingSystem, CoreError, IdempotencyKey, Money, Payment, PaymentId, SagaId,
    StepId, StoreError, TenantContext,
};
use payrail_ledger::Transaction;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Funds reservation receipt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub account: AccountNumber,
    pub amount: Money,
    /// Account balance before the reservation took effect, used as the
    /// opening balance of the debit ledger entry.
    pub balance_before: Money,
}

/// Account operations. `reserve`/`release` must be idempotent on
/// `(saga_id, step_id)`: a replayed call returns the original receipt.
#[async_trait]
pub trait AccountAdapter: Send + Sync {
    async fn reserve(
        &self,
        account: &AccountNumber,
        amount: &Money,
        saga_id: &SagaId,
        step_id: &StepId,
    ) -> Result<Reservation, CoreError>;

    async fn release(
        &self,
        reservation_id: &str,
        saga_id: &SagaId,
        step_id: &StepId,
    ) -> Result<(), CoreError>;

    async fn balance(&self, account: &AccountNumber) -> Result<Money, CoreError>;
}

/// Clearing-system submission. `submit` returns the clearing reference;
/// `reverse` undoes an acknowledged submission.
#[async_trait]
pub trait ClearingAdapter: Send + Sync {
    async fn submit(
        &self,
        transaction: &Transaction,
        clearing_system: &ClearingSystem,
        saga_id: &SagaId,
        step_id: &StepId,
    ) -> Result<String, CoreError>;

    async fn reverse(
        &self,
        clearing_reference: &str,
        saga_id: &SagaId,
        step_id: &StepId,
    ) -> Result<(), CoreError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementResult {
    pub clearing_reference: String,
    pub settled_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettlementPort: Send + Sync {
    async fn wait_for(
        &self,
        clearing_reference: &str,
        timeout: Duration,
    ) -> Result<SettlementResult, CoreError>;

    async fn cancel(&self, clearing_reference: &str) -> Result<(), CoreError>;
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(&self, payment_id: &PaymentId, event: &str) -> Result<(), CoreError>;
}

/// Payment aggregate persistence. `save` drains the aggregate's pending
/// events into the outbox atomically with the write; passing the
/// idempotency key on the initial save registers it, and a duplicate key is
/// refused with the original payment id.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn load(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
    ) -> Result<Option<Payment>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
        tenant: &TenantContext,
    ) -> Result<Option<PaymentId>, StoreError>;

    async fn save(
        &self,
        payment: &mut Payment,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<(), StoreError>;
}

/// Saga aggregate persistence with optimistic concurrency: a save whose
/// aggregate version does not match the stored version is refused, and the
/// losing worker aborts cleanly.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    async fn load(
        &self,
        saga_id: &SagaId,
        tenant: &TenantContext,
    ) -> Result<Option<SagaInstance>, StoreError>;

    async fn find_by_business_key(
        &self,
        business_key: &str,
        tenant: &TenantContext,
    ) -> Result<Option<SagaInstance>, StoreError>;

    async fn save(&self, saga: &mut SagaInstance) -> Result<(), StoreError>;

    /// Ids and tenants of every saga in a non-terminal status, for crash
    /// recovery.
    async fn list_in_flight(&self) -> Result<Vec<(SagaId, TenantContext)>, StoreError>;
}
