//! Routing decisions.

use chrono::{DateTime, Utc};
use payrail_domain::{ClearingSystem, PaymentId, PaymentPriority};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The outcome of routing one payment. Exactly one of the normal, rejected,
/// held or fallback interpretations is authoritative downstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub payment_id: PaymentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub clearing_system: ClearingSystem,
    pub priority: PaymentPriority,
    pub decision_reason: String,
    pub rejected: bool,
    pub held: bool,
    pub fallback: bool,
    pub metadata: BTreeMap<String, String>,
    pub notifications: BTreeSet<String>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// Fallback decision used when no rule matches.
    pub fn fallback(
        payment_id: PaymentId,
        clearing_system: ClearingSystem,
        priority: PaymentPriority,
    ) -> Self {
        Self {
            payment_id,
            rule_id: None,
            rule_name: None,
            clearing_system,
            priority,
            decision_reason: "No matching rule found".to_string(),
            rejected: false,
            held: false,
            fallback: true,
            metadata: BTreeMap::new(),
            notifications: BTreeSet::new(),
            decided_at: Utc::now(),
        }
    }

    /// A decision that lets the payment proceed to clearing.
    pub fn is_actionable(&self) -> bool {
        !self.rejected && !self.held
    }
}
