//! Validation outcome types.

use chrono::{DateTime, Utc};
use payrail_domain::{PaymentId, TenantContext, ValidationId};
use serde::{Deserialize, Serialize};

/// The four rule groups, in their fixed execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Business,
    Compliance,
    Fraud,
    Risk,
}

impl RuleType {
    /// Group execution order: business, compliance, fraud, risk.
    pub const EXECUTION_ORDER: [RuleType; 4] = [
        RuleType::Business,
        RuleType::Compliance,
        RuleType::Fraud,
        RuleType::Risk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Business => "BUSINESS",
            Self::Compliance => "COMPLIANCE",
            Self::Fraud => "FRAUD",
            Self::Risk => "RISK",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Passed,
    Failed,
}

/// Risk classification derived from the taxonomy of failed rule types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// A rule that did not pass, with the audited reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRule {
    pub rule_name: String,
    pub rule_type: RuleType,
    pub reason: String,
}

/// One validation attempt. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validation_id: ValidationId,
    pub payment_id: PaymentId,
    pub tenant: TenantContext,
    pub status: ValidationStatus,
    pub risk_level: RiskLevel,
    pub fraud_score: u32,
    pub risk_score: u32,
    /// Rule names in execution order; the audit trace.
    pub applied_rules: Vec<String>,
    pub failed_rules: Vec<FailedRule>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }

    /// First failure reason, used as the saga's step failure message.
    pub fn first_failure_reason(&self) -> Option<&str> {
        self.failed_rules.first().map(|rule| rule.reason.as_str())
    }

    /// Derive the risk level from the failed-rule taxonomy: any FRAUD
    /// failure is CRITICAL, else any RISK failure is HIGH, else any failure
    /// is MEDIUM, else LOW.
    pub fn derive_risk_level(failed_rules: &[FailedRule]) -> RiskLevel {
        if failed_rules
            .iter()
            .any(|rule| rule.rule_type == RuleType::Fraud)
        {
            RiskLevel::Critical
        } else if failed_rules
            .iter()
            .any(|rule| rule.rule_type == RuleType::Risk)
        {
            RiskLevel::High
        } else if !failed_rules.is_empty() {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(rule_type: RuleType) -> FailedRule {
        FailedRule {
            rule_name: "r".to_string(),
            rule_type,
            reason: "reason".to_string(),
        }
    }

    #[test]
    fn risk_level_taxonomy() {
        assert_eq!(ValidationResult::derive_risk_level(&[]), RiskLevel::Low);
        assert_eq!(
            ValidationResult::derive_risk_level(&[failed(RuleType::Business)]),
            RiskLevel::Medium
        );
        assert_eq!(
            ValidationResult::derive_risk_level(&[failed(RuleType::Risk)]),
            RiskLevel::High
        );
        assert_eq!(
            ValidationResult::derive_risk_level(&[failed(RuleType::Risk), failed(RuleType::Fraud)]),
            RiskLevel::Critical
        );
    }

    #[test]
    fn group_order_is_fixed() {
        assert_eq!(
            RuleType::EXECUTION_ORDER,
            [
                RuleType::Business,
                RuleType::Compliance,
                RuleType::Fraud,
                RuleType::Risk
            ]
        );
    }
}
