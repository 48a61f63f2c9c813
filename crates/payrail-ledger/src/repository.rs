//! Transaction repository port.

use crate::transaction::Transaction;
use async_trait::async_trait;
use payrail_domain::{PaymentId, StoreError, TenantContext, TransactionId};

/// Persistence port for the transaction aggregate.
///
/// `save` uses optimistic concurrency: the aggregate's `version` must match
/// the stored version or the write is rejected with a version conflict.
/// Implementations must verify the double-entry invariant and drain the
/// aggregate's pending events into the outbox atomically with the write.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn load(
        &self,
        transaction_id: &TransactionId,
        tenant: &TenantContext,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn find_by_payment(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn save(&self, transaction: &mut Transaction) -> Result<(), StoreError>;
}
