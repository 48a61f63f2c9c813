//! Scriptable in-memory clearing, settlement and notification adapters.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use payrail_domain::{ClearingSystem, CoreError, PaymentId, SagaId, StepId};
use payrail_ledger::Transaction;
use payrail_saga::{ClearingAdapter, NotificationPort, SettlementPort, SettlementResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory clearing adapter. Failures can be scripted per call, and every
/// submission is recorded with its `(saga_id, step_id)` pair so tests can
/// assert idempotent replays.
pub struct MemoryClearingAdapter {
    submissions: DashMap<String, String>,
    reversals: Mutex<Vec<String>>,
    scripted_failures: Mutex<VecDeque<CoreError>>,
    submit_calls: Mutex<Vec<(String, String)>>,
    submit_delay: Mutex<Option<Duration>>,
    counter: AtomicU64,
}

impl MemoryClearingAdapter {
    pub fn new() -> Self {
        Self {
            submissions: DashMap::new(),
            reversals: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            submit_calls: Mutex::new(Vec::new()),
            submit_delay: Mutex::new(None),
            counter: AtomicU64::new(0),
        }
    }

    /// Queue a failure for the next unsatisfied submit call.
    pub fn fail_next(&self, error: CoreError) {
        self.scripted_failures.lock().unwrap().push_back(error);
    }

    pub fn delay_submissions(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }

    pub fn submit_calls(&self) -> Vec<(String, String)> {
        self.submit_calls.lock().unwrap().clone()
    }

    pub fn reversals(&self) -> Vec<String> {
        self.reversals.lock().unwrap().clone()
    }
}

impl Default for MemoryClearingAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClearingAdapter for MemoryClearingAdapter {
    async fn submit(
        &self,
        _transaction: &Transaction,
        _clearing_system: &ClearingSystem,
        saga_id: &SagaId,
        step_id: &StepId,
    ) -> Result<String, CoreError> {
        self.submit_calls
            .lock()
            .unwrap()
            .push((saga_id.to_string(), step_id.to_string()));

        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = format!("{saga_id}::{step_id}");
        if let Some(existing) = self.submissions.get(&key) {
            return Ok(existing.clone());
        }

        if let Some(error) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let reference = format!("CLR-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.submissions.insert(key, reference.clone());
        Ok(reference)
    }

    async fn reverse(
        &self,
        clearing_reference: &str,
        _saga_id: &SagaId,
        _step_id: &StepId,
    ) -> Result<(), CoreError> {
        let mut reversals = self.reversals.lock().unwrap();
        if !reversals.iter().any(|r| r == clearing_reference) {
            reversals.push(clearing_reference.to_string());
        }
        Ok(())
    }
}

/// Settlement port that settles immediately unless a failure is scripted.
pub struct MemorySettlementPort {
    scripted_failures: Mutex<VecDeque<CoreError>>,
    cancelled: Mutex<Vec<String>>,
}

impl MemorySettlementPort {
    pub fn new() -> Self {
        Self {
            scripted_failures: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, error: CoreError) {
        self.scripted_failures.lock().unwrap().push_back(error);
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl Default for MemorySettlementPort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementPort for MemorySettlementPort {
    async fn wait_for(
        &self,
        clearing_reference: &str,
        _timeout: Duration,
    ) -> Result<SettlementResult, CoreError> {
        if let Some(error) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(SettlementResult {
            clearing_reference: clearing_reference.to_string(),
            settled_at: Utc::now(),
        })
    }

    async fn cancel(&self, clearing_reference: &str) -> Result<(), CoreError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(clearing_reference.to_string());
        Ok(())
    }
}

/// Notification port that records deliveries.
#[derive(Default)]
pub struct MemoryNotificationPort {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemoryNotificationPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationPort for MemoryNotificationPort {
    async fn send(&self, payment_id: &PaymentId, event: &str) -> Result<(), CoreError> {
        self.sent
            .lock()
            .unwrap()
            .push((payment_id.to_string(), event.to_string()));
        Ok(())
    }
}
