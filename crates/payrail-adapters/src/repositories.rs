//! In-memory repositories for the three aggregates.
//!
//! Suitable for development and testing; production deployments use
//! persistent backends behind the same ports. Every save enforces the
//! optimistic version check, verifies aggregate invariants, and drains the
//! aggregate's pending events into the shared outbox in the same
//! operation.

use crate::outbox::MemoryOutbox;
use async_trait::async_trait;
use dashmap::DashMap;
use payrail_domain::{
    IdempotencyKey, Payment, PaymentId, SagaId, StoreError, TenantContext, TransactionId,
};
use payrail_ledger::{Transaction, TransactionRepository};
use payrail_saga::{PaymentRepository, SagaInstance, SagaRepository};
use std::sync::Arc;

fn check_version(aggregate: &str, stored: u64, incoming: u64) -> Result<(), StoreError> {
    if stored != incoming {
        return Err(StoreError::VersionConflict {
            aggregate: aggregate.to_string(),
            expected: incoming,
            actual: stored,
        });
    }
    Ok(())
}

// ── Payments ─────────────────────────────────────────────────────────

pub struct MemoryPaymentRepository {
    rows: DashMap<String, Payment>,
    idempotency: DashMap<String, String>,
    outbox: Arc<MemoryOutbox>,
}

impl MemoryPaymentRepository {
    pub fn new(outbox: Arc<MemoryOutbox>) -> Self {
        Self {
            rows: DashMap::new(),
            idempotency: DashMap::new(),
            outbox,
        }
    }

    fn key_scope(tenant: &TenantContext, key: &IdempotencyKey) -> String {
        format!("{}::{}", tenant.tenant_id(), key)
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentRepository {
    async fn load(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .rows
            .get(payment_id.as_str())
            .filter(|payment| payment.tenant.visible_to(tenant))
            .map(|payment| payment.clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
        tenant: &TenantContext,
    ) -> Result<Option<PaymentId>, StoreError> {
        match self.idempotency.get(&Self::key_scope(tenant, key)) {
            Some(entry) => Ok(Some(PaymentId::new(entry.value().clone()).map_err(|e| {
                StoreError::RejectedWrite(e.to_string())
            })?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        payment: &mut Payment,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<(), StoreError> {
        if let Some(stored) = self.rows.get(payment.payment_id.as_str()) {
            check_version("payment", stored.version, payment.version)?;
        }

        if let Some(key) = idempotency_key {
            let scope = Self::key_scope(&payment.tenant, key);
            match self.idempotency.entry(scope) {
                dashmap::mapref::entry::Entry::Occupied(existing)
                    if existing.get().as_str() != payment.payment_id.as_str() =>
                {
                    return Err(StoreError::DuplicateIdempotencyKey {
                        payment_id: existing.get().clone(),
                    });
                }
                dashmap::mapref::entry::Entry::Occupied(_) => {}
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(payment.payment_id.as_str().to_string());
                }
            }
        }

        payment.version += 1;
        self.outbox.append(payment.drain_events())?;
        self.rows
            .insert(payment.payment_id.as_str().to_string(), payment.clone());
        Ok(())
    }
}

// ── Sagas ────────────────────────────────────────────────────────────

pub struct MemorySagaRepository {
    rows: DashMap<String, SagaInstance>,
    outbox: Arc<MemoryOutbox>,
}

impl MemorySagaRepository {
    pub fn new(outbox: Arc<MemoryOutbox>) -> Self {
        Self {
            rows: DashMap::new(),
            outbox,
        }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl SagaRepository for MemorySagaRepository {
    async fn load(
        &self,
        saga_id: &SagaId,
        tenant: &TenantContext,
    ) -> Result<Option<SagaInstance>, StoreError> {
        Ok(self
            .rows
            .get(saga_id.as_str())
            .filter(|saga| saga.tenant.visible_to(tenant))
            .map(|saga| saga.clone()))
    }

    async fn find_by_business_key(
        &self,
        business_key: &str,
        tenant: &TenantContext,
    ) -> Result<Option<SagaInstance>, StoreError> {
        Ok(self
            .rows
            .iter()
            .find(|entry| entry.business_key == business_key && entry.tenant.visible_to(tenant))
            .map(|entry| entry.clone()))
    }

    async fn save(&self, saga: &mut SagaInstance) -> Result<(), StoreError> {
        if let Some(stored) = self.rows.get(saga.saga_id.as_str()) {
            check_version("saga", stored.version, saga.version)?;
        }
        saga.version += 1;
        self.outbox.append(saga.drain_events())?;
        self.rows
            .insert(saga.saga_id.as_str().to_string(), saga.clone());
        Ok(())
    }

    async fn list_in_flight(&self) -> Result<Vec<(SagaId, TenantContext)>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| !entry.is_terminal())
            .map(|entry| (entry.saga_id.clone(), entry.tenant.clone()))
            .collect())
    }
}

// ── Transactions ─────────────────────────────────────────────────────

pub struct MemoryTransactionRepository {
    rows: DashMap<String, Transaction>,
    outbox: Arc<MemoryOutbox>,
}

impl MemoryTransactionRepository {
    pub fn new(outbox: Arc<MemoryOutbox>) -> Self {
        Self {
            rows: DashMap::new(),
            outbox,
        }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn all(&self) -> Vec<Transaction> {
        self.rows.iter().map(|entry| entry.clone()).collect()
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn load(
        &self,
        transaction_id: &TransactionId,
        tenant: &TenantContext,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .rows
            .get(transaction_id.as_str())
            .filter(|transaction| transaction.tenant.visible_to(tenant))
            .map(|transaction| transaction.clone()))
    }

    async fn find_by_payment(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .rows
            .iter()
            .find(|entry| {
                entry.payment_id == *payment_id && entry.tenant.visible_to(tenant)
            })
            .map(|entry| entry.clone()))
    }

    async fn save(&self, transaction: &mut Transaction) -> Result<(), StoreError> {
        // The ledger invariant gates every write.
        transaction
            .verify_double_entry()
            .map_err(|e| StoreError::RejectedWrite(e.to_string()))?;

        if let Some(stored) = self.rows.get(transaction.transaction_id.as_str()) {
            check_version("transaction", stored.version, transaction.version)?;
        }
        transaction.version += 1;
        self.outbox.append(transaction.drain_events())?;
        self.rows.insert(
            transaction.transaction_id.as_str().to_string(),
            transaction.clone(),
        );
        Ok(())
    }
}
