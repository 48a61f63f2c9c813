//! In-memory account adapter with idempotent reserve/release.

use async_trait::async_trait;
use dashmap::DashMap;
use payrail_domain::{AccountNumber, CoreError, Money, SagaId, StepId};
use payrail_saga::{AccountAdapter, Reservation};
use uuid::Uuid;

pub struct MemoryAccountAdapter {
    balances: DashMap<String, Money>,
    /// Reservations keyed by the `(saga_id, step_id)` idempotency pair.
    reservations: DashMap<String, Reservation>,
    released: DashMap<String, ()>,
}

impl MemoryAccountAdapter {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            reservations: DashMap::new(),
            released: DashMap::new(),
        }
    }

    pub fn with_account(self, account: &AccountNumber, opening: Money) -> Self {
        self.balances.insert(account.as_str().to_string(), opening);
        self
    }

    pub fn balance_of(&self, account: &AccountNumber) -> Option<Money> {
        self.balances.get(account.as_str()).map(|b| b.clone())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn idempotency_key(saga_id: &SagaId, step_id: &StepId) -> String {
        format!("{saga_id}::{step_id}")
    }
}

impl Default for MemoryAccountAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountAdapter for MemoryAccountAdapter {
    async fn reserve(
        &self,
        account: &AccountNumber,
        amount: &Money,
        saga_id: &SagaId,
        step_id: &StepId,
    ) -> Result<Reservation, CoreError> {
        let key = Self::idempotency_key(saga_id, step_id);
        if let Some(existing) = self.reservations.get(&key) {
            return Ok(existing.clone());
        }

        let mut balance = self
            .balances
            .get_mut(account.as_str())
            .ok_or_else(|| CoreError::permanent(format!("unknown account {account}")))?;
        let before = balance.clone();
        if before.try_cmp(amount).map_err(CoreError::from)? == std::cmp::Ordering::Less {
            return Err(CoreError::permanent(format!(
                "insufficient funds on {account}"
            )));
        }
        *balance = before.checked_sub(amount).map_err(CoreError::from)?;

        let reservation = Reservation {
            reservation_id: Uuid::new_v4().to_string(),
            account: account.clone(),
            amount: amount.clone(),
            balance_before: before,
        };
        self.reservations.insert(key, reservation.clone());
        Ok(reservation)
    }

    async fn release(
        &self,
        reservation_id: &str,
        _saga_id: &SagaId,
        _step_id: &StepId,
    ) -> Result<(), CoreError> {
        // Replays of an already-released reservation are no-ops.
        if self.released.contains_key(reservation_id) {
            return Ok(());
        }
        let reservation = self
            .reservations
            .iter()
            .find(|entry| entry.reservation_id == reservation_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                CoreError::permanent(format!("unknown reservation {reservation_id}"))
            })?;

        let mut balance = self
            .balances
            .get_mut(reservation.account.as_str())
            .ok_or_else(|| {
                CoreError::permanent(format!("unknown account {}", reservation.account))
            })?;
        *balance = balance
            .checked_add(&reservation.amount)
            .map_err(CoreError::from)?;
        self.released.insert(reservation_id.to_string(), ());
        Ok(())
    }

    async fn balance(&self, account: &AccountNumber) -> Result<Money, CoreError> {
        self.balances
            .get(account.as_str())
            .map(|balance| balance.clone())
            .ok_or_else(|| CoreError::permanent(format!("unknown account {account}")))
    }
}
