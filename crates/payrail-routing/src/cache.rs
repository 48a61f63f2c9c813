//! Read-mostly caches for the routing engine.

use crate::decision::RoutingDecision;
use crate::rule::RoutingRule;
use dashmap::DashMap;
use payrail_domain::{PaymentId, TenantContext};
use std::time::{Duration, Instant};

/// TTL cache over the tenant's active rule set. Readers never block behind
/// a refresh: a stale entry is simply replaced by whichever writer loads
/// next.
pub struct RuleCache {
    entries: DashMap<String, CachedRules>,
    ttl: Duration,
}

struct CachedRules {
    loaded_at: Instant,
    rules: Vec<RoutingRule>,
}

impl RuleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn scope_key(tenant: &TenantContext) -> String {
        match tenant.business_unit() {
            Some(unit) => format!("{}::{}", tenant.tenant_id(), unit),
            None => tenant.tenant_id().to_string(),
        }
    }

    pub fn get(&self, tenant: &TenantContext) -> Option<Vec<RoutingRule>> {
        let key = Self::scope_key(tenant);
        let entry = self.entries.get(&key)?;
        if entry.loaded_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.rules.clone())
    }

    pub fn put(&self, tenant: &TenantContext, rules: Vec<RoutingRule>) {
        self.entries.insert(
            Self::scope_key(tenant),
            CachedRules {
                loaded_at: Instant::now(),
                rules,
            },
        );
    }

    pub fn invalidate(&self, tenant: &TenantContext) {
        self.entries.remove(&Self::scope_key(tenant));
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }
}

/// Positive decisions cached per payment for idempotent replays.
#[derive(Default)]
pub struct DecisionCache {
    entries: DashMap<PaymentId, RoutingDecision>,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, payment_id: &PaymentId) -> Option<RoutingDecision> {
        self.entries.get(payment_id).map(|entry| entry.clone())
    }

    pub fn put(&self, decision: RoutingDecision) {
        self.entries.insert(decision.payment_id.clone(), decision);
    }

    pub fn invalidate(&self, payment_id: &PaymentId) {
        self.entries.remove(payment_id);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
