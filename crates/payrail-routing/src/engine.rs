//! The routing decision engine.
//!
//! Fetches the tenant's active rules, evaluates every rule concurrently with
//! a per-rule timeout, selects the matching rule with the smallest priority
//! (ties broken by stable id ordering) and executes its actions. One
//! misbehaving rule never fails the whole evaluation: it is skipped with a
//! warning.

use crate::cache::{DecisionCache, RuleCache};
use crate::decision::RoutingDecision;
use crate::request::RoutingRequest;
use crate::rule::{ActionType, RoutingRule, RuleStatus};
use chrono::{DateTime, Utc};
use payrail_domain::{ClearingSystem, CoreError, PaymentId, TenantContext};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("Routing rules unavailable: {0}")]
    RulesUnavailable(String),
}

impl From<RoutingError> for CoreError {
    fn from(err: RoutingError) -> Self {
        CoreError::Transient(err.to_string())
    }
}

/// Source of active routing rules for a tenant scope.
#[async_trait::async_trait]
pub trait RoutingRulesPort: Send + Sync {
    async fn load_active(
        &self,
        tenant: &TenantContext,
        at: DateTime<Utc>,
    ) -> Result<Vec<RoutingRule>, CoreError>;
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Budget for evaluating a single rule before it is skipped.
    pub rule_evaluation_timeout: Duration,
    /// Clearing system substituted when no rule (or no primary route
    /// action) decides one.
    pub fallback_clearing_system: ClearingSystem,
    /// How long a loaded rule set stays fresh.
    pub rule_cache_ttl: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rule_evaluation_timeout: Duration::from_secs(2),
            fallback_clearing_system: ClearingSystem::new("DEFAULT_CLEARING")
                .expect("static clearing system name"),
            rule_cache_ttl: Duration::from_secs(300),
        }
    }
}

pub struct RoutingEngine {
    rules_port: Arc<dyn RoutingRulesPort>,
    rule_cache: RuleCache,
    decisions: DecisionCache,
    config: RoutingConfig,
}

impl RoutingEngine {
    pub fn new(rules_port: Arc<dyn RoutingRulesPort>, config: RoutingConfig) -> Self {
        Self {
            rules_port,
            rule_cache: RuleCache::new(config.rule_cache_ttl),
            decisions: DecisionCache::new(),
            config,
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Evaluate a routing request into a decision.
    pub async fn evaluate(&self, request: &RoutingRequest) -> Result<RoutingDecision, RoutingError> {
        if let Some(cached) = self.decisions.get(&request.payment_id) {
            debug!(payment_id = %request.payment_id, "routing decision cache hit");
            return Ok(cached);
        }

        let rules = self.load_rules(&request.tenant, request.created_at).await?;
        let matching = self.matching_rules(rules, request).await;

        let winner = matching
            .into_iter()
            .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let decision = match winner {
            Some(rule) => {
                debug!(
                    payment_id = %request.payment_id,
                    rule = %rule.rule_name,
                    priority = rule.priority,
                    "routing rule selected"
                );
                self.apply_actions(&rule, request)
            }
            None => RoutingDecision::fallback(
                request.payment_id.clone(),
                self.config.fallback_clearing_system.clone(),
                request.priority,
            ),
        };

        if decision.is_actionable() {
            self.decisions.put(decision.clone());
        }
        Ok(decision)
    }

    pub fn invalidate(&self, payment_id: &PaymentId) {
        self.decisions.invalidate(payment_id);
    }

    pub fn invalidate_all(&self) {
        self.decisions.invalidate_all();
    }

    pub fn invalidate_rules(&self, tenant: &TenantContext) {
        self.rule_cache.invalidate(tenant);
    }

    async fn load_rules(
        &self,
        tenant: &TenantContext,
        at: DateTime<Utc>,
    ) -> Result<Vec<RoutingRule>, RoutingError> {
        let loaded = match self.rule_cache.get(tenant) {
            Some(rules) => rules,
            None => {
                let rules = self
                    .rules_port
                    .load_active(tenant, at)
                    .await
                    .map_err(|e| RoutingError::RulesUnavailable(e.to_string()))?;
                self.rule_cache.put(tenant, rules.clone());
                rules
            }
        };

        // Tenant isolation must hold even when the port mis-scopes.
        Ok(loaded
            .into_iter()
            .filter(|rule| {
                rule.status == RuleStatus::Active
                    && rule.is_effective_at(at)
                    && rule.applies_to(tenant)
            })
            .collect())
    }

    /// Fan each rule out into its own blocking task so a pathological rule
    /// cannot stall its peers, and bound every task by the per-rule timeout.
    async fn matching_rules(
        &self,
        rules: Vec<RoutingRule>,
        request: &RoutingRequest,
    ) -> Vec<RoutingRule> {
        let evaluations = rules.into_iter().map(|rule| {
            let request = request.clone();
            let timeout = self.config.rule_evaluation_timeout;
            async move {
                let rule_id = rule.id.clone();
                let rule_name = rule.rule_name.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let matched = rule.matches(&request);
                    (rule, matched)
                });
                match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok((rule, true))) => Some(rule),
                    Ok(Ok((_, false))) => None,
                    Ok(Err(join_err)) => {
                        warn!(rule_id = %rule_id, rule = %rule_name, error = %join_err,
                            "routing rule evaluation panicked; rule skipped");
                        None
                    }
                    Err(_) => {
                        warn!(rule_id = %rule_id, rule = %rule_name,
                            "routing rule evaluation timed out; rule skipped");
                        None
                    }
                }
            }
        });

        futures::future::join_all(evaluations)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    fn apply_actions(&self, rule: &RoutingRule, request: &RoutingRequest) -> RoutingDecision {
        let mut decision = RoutingDecision {
            payment_id: request.payment_id.clone(),
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.rule_name.clone()),
            clearing_system: self.config.fallback_clearing_system.clone(),
            priority: request.priority,
            decision_reason: format!("Matched rule '{}'", rule.rule_name),
            rejected: false,
            held: false,
            fallback: false,
            metadata: Default::default(),
            notifications: Default::default(),
            decided_at: Utc::now(),
        };

        let mut routed = false;
        for action in &rule.actions {
            match action.action_type {
                ActionType::RouteToClearingSystem => {
                    if action.is_primary {
                        if let Some(system) = &action.clearing_system {
                            decision.clearing_system = system.clone();
                            routed = true;
                        }
                    }
                }
                ActionType::SetPriority => {
                    if let Some(priority) = action.routing_priority {
                        decision.priority = priority;
                    }
                }
                ActionType::AddMetadata => {
                    for (key, value) in &action.parameters {
                        decision.metadata.insert(key.clone(), value.clone());
                    }
                }
                ActionType::RejectPayment => {
                    decision.rejected = true;
                    decision.decision_reason = action
                        .parameters
                        .get("reason")
                        .cloned()
                        .unwrap_or_else(|| format!("Rejected by rule '{}'", rule.rule_name));
                }
                ActionType::HoldPayment => {
                    decision.held = true;
                    decision.decision_reason = action
                        .parameters
                        .get("reason")
                        .cloned()
                        .unwrap_or_else(|| format!("Held by rule '{}'", rule.rule_name));
                }
                ActionType::Notify => {
                    let target = action
                        .parameters
                        .get("target")
                        .cloned()
                        .unwrap_or_else(|| "operations".to_string());
                    decision.notifications.insert(target);
                }
            }
        }

        if !routed {
            decision.fallback = true;
        }
        decision
    }
}
