//! Static rule sources and the in-memory rule context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use payrail_domain::{AccountNumber, CoreError, TenantContext};
use payrail_routing::{RoutingRule, RoutingRulesPort, RuleStatus};
use payrail_validation::{
    standard_rule_set, RuleContext, RuleError, ValidationConfig, ValidationRule,
    ValidationRulesPort,
};
use std::sync::{Arc, Mutex};

/// Serves one fixed validation rule set to every tenant.
pub struct StaticValidationRules {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl StaticValidationRules {
    pub fn standard(config: &ValidationConfig) -> Self {
        Self {
            rules: standard_rule_set(config),
        }
    }

    pub fn with_rules(rules: Vec<Arc<dyn ValidationRule>>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl ValidationRulesPort for StaticValidationRules {
    async fn load(
        &self,
        _tenant: &TenantContext,
    ) -> Result<Vec<Arc<dyn ValidationRule>>, CoreError> {
        Ok(self.rules.clone())
    }
}

/// Pre-fetched sanctions and velocity snapshots.
#[derive(Default)]
pub struct MemoryRuleContext {
    sanctioned: DashMap<String, ()>,
    velocity: DashMap<String, u32>,
}

impl MemoryRuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sanction(&self, account: &AccountNumber) {
        self.sanctioned.insert(account.as_str().to_string(), ());
    }

    pub fn set_velocity(&self, account: &AccountNumber, count: u32) {
        self.velocity.insert(account.as_str().to_string(), count);
    }
}

impl RuleContext for MemoryRuleContext {
    fn is_sanctioned(&self, account: &AccountNumber) -> Result<bool, RuleError> {
        Ok(self.sanctioned.contains_key(account.as_str()))
    }

    fn payment_velocity(&self, account: &AccountNumber) -> Result<u32, RuleError> {
        Ok(self
            .velocity
            .get(account.as_str())
            .map(|count| *count)
            .unwrap_or(0))
    }
}

/// Authored routing rules held in memory, scoped at load time.
#[derive(Default)]
pub struct MemoryRoutingRules {
    rules: Mutex<Vec<RoutingRule>>,
}

impl MemoryRoutingRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }

    pub fn push(&self, rule: RoutingRule) {
        self.rules.lock().unwrap().push(rule);
    }
}

#[async_trait]
impl RoutingRulesPort for MemoryRoutingRules {
    async fn load_active(
        &self,
        tenant: &TenantContext,
        at: DateTime<Utc>,
    ) -> Result<Vec<RoutingRule>, CoreError> {
        Ok(self
            .rules
            .lock()
            .map_err(|_| CoreError::transient("routing rules lock poisoned"))?
            .iter()
            .filter(|rule| {
                rule.status == RuleStatus::Active
                    && rule.is_effective_at(at)
                    && rule.applies_to(tenant)
            })
            .cloned()
            .collect())
    }
}
