//! Per-tenant backpressure for saga dispatch.

use crate::error::SagaError;
use dashmap::DashMap;
use payrail_domain::TenantContext;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// In-flight sagas a single tenant may hold.
    pub max_in_flight_per_tenant: usize,
    /// Requests allowed to queue behind a saturated tenant.
    pub queue_depth: usize,
    /// How long a queued request may wait before it is evicted.
    pub max_queue_wait: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_in_flight_per_tenant: 64,
            queue_depth: 128,
            max_queue_wait: Duration::from_secs(10),
        }
    }
}

struct TenantSlot {
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
}

/// Bounds in-flight sagas per tenant. Beyond the cap, requests queue up to
/// `queue_depth` with age-bounded eviction; a saturated queue refuses
/// immediately with `TOO_MANY_IN_FLIGHT`.
pub struct TenantGate {
    slots: DashMap<String, Arc<TenantSlot>>,
    config: ThrottleConfig,
}

/// Held for the lifetime of one in-flight saga.
pub struct InFlightPermit {
    _permit: OwnedSemaphorePermit,
}

impl TenantGate {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
        }
    }

    pub async fn acquire(&self, tenant: &TenantContext) -> Result<InFlightPermit, SagaError> {
        let slot = self
            .slots
            .entry(tenant.tenant_id().to_string())
            .or_insert_with(|| {
                Arc::new(TenantSlot {
                    semaphore: Arc::new(Semaphore::new(self.config.max_in_flight_per_tenant)),
                    queued: AtomicUsize::new(0),
                })
            })
            .clone();

        if let Ok(permit) = slot.semaphore.clone().try_acquire_owned() {
            return Ok(InFlightPermit { _permit: permit });
        }

        // Saturated: join the bounded wait queue.
        let queued = slot.queued.fetch_add(1, Ordering::SeqCst);
        if queued >= self.config.queue_depth {
            slot.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(tenant = %tenant, "tenant dispatch queue saturated");
            return Err(SagaError::TooManyInFlight(tenant.tenant_id().to_string()));
        }

        let waited = tokio::time::timeout(
            self.config.max_queue_wait,
            slot.semaphore.clone().acquire_owned(),
        )
        .await;
        slot.queued.fetch_sub(1, Ordering::SeqCst);

        match waited {
            Ok(Ok(permit)) => Ok(InFlightPermit { _permit: permit }),
            // Aged out of the queue, or the gate was torn down.
            _ => {
                warn!(tenant = %tenant, "queued saga dispatch evicted by age bound");
                Err(SagaError::TooManyInFlight(tenant.tenant_id().to_string()))
            }
        }
    }

    pub fn in_flight(&self, tenant: &TenantContext) -> usize {
        self.slots
            .get(tenant.tenant_id())
            .map(|slot| {
                self.config.max_in_flight_per_tenant - slot.semaphore.available_permits()
            })
            .unwrap_or(0)
    }
}
