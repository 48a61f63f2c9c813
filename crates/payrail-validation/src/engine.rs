//! The validation engine.
//!
//! Executes the four rule groups in order, collecting failures into a scored
//! `ValidationResult`. Rules are never reordered: the applied-rule list is
//! the audit trace. Given identical input, rule set and context, the output
//! is identical.

use crate::result::{FailedRule, RuleType, ValidationResult, ValidationStatus};
use crate::rule::{RuleContext, RuleOutcome, ValidationRule, ValidationRulesPort};
use crate::rules::ValidationConfig;
use chrono::Utc;
use payrail_domain::{CoreError, PaymentId, PaymentRequest, ValidationId};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Validation rules unavailable: {0}")]
    RulesUnavailable(String),

    /// Every rule in a group failed to execute; the engine itself is
    /// suspect and the result would not be trustworthy.
    #[error("Validation engine failure in {} group: {message}", group.as_str())]
    EngineFailure { group: RuleType, message: String },
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RulesUnavailable(message) => CoreError::Transient(message),
            fatal @ ValidationError::EngineFailure { .. } => {
                CoreError::Permanent(fatal.to_string())
            }
        }
    }
}

/// Applies tenant-scoped rule sets to payment requests.
pub struct ValidationEngine {
    rules_port: Arc<dyn ValidationRulesPort>,
    context: Arc<dyn RuleContext>,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(
        rules_port: Arc<dyn ValidationRulesPort>,
        context: Arc<dyn RuleContext>,
        config: ValidationConfig,
    ) -> Self {
        Self {
            rules_port,
            context,
            config,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Load the tenant's rule set and evaluate the request against it.
    pub async fn validate(
        &self,
        payment_id: &PaymentId,
        request: &PaymentRequest,
    ) -> Result<ValidationResult, ValidationError> {
        let rules = self
            .rules_port
            .load(&request.tenant)
            .await
            .map_err(|e| ValidationError::RulesUnavailable(e.to_string()))?;
        self.evaluate(payment_id, request, &rules)
    }

    /// Pure evaluation over an already-loaded rule set.
    pub fn evaluate(
        &self,
        payment_id: &PaymentId,
        request: &PaymentRequest,
        rules: &[Arc<dyn ValidationRule>],
    ) -> Result<ValidationResult, ValidationError> {
        let mut applied_rules = Vec::new();
        let mut failed_rules: Vec<FailedRule> = Vec::new();

        for group in RuleType::EXECUTION_ORDER {
            let group_rules: Vec<&Arc<dyn ValidationRule>> = rules
                .iter()
                .filter(|rule| rule.rule_type() == group)
                .collect();
            if group_rules.is_empty() {
                continue;
            }

            let mut execution_errors = 0usize;
            let mut last_error = String::new();

            for rule in &group_rules {
                applied_rules.push(rule.name().to_string());
                match rule.evaluate(request, self.context.as_ref()) {
                    Ok(RuleOutcome::Pass) => {}
                    Ok(RuleOutcome::Fail { reason }) => {
                        failed_rules.push(FailedRule {
                            rule_name: rule.name().to_string(),
                            rule_type: group,
                            reason,
                        });
                    }
                    Err(err) => {
                        warn!(
                            rule = rule.name(),
                            group = group.as_str(),
                            error = %err,
                            "validation rule execution error"
                        );
                        execution_errors += 1;
                        last_error = err.to_string();
                        failed_rules.push(FailedRule {
                            rule_name: rule.name().to_string(),
                            rule_type: group,
                            reason: format!("RULE_EXECUTION_ERROR: {err}"),
                        });
                    }
                }
            }

            if execution_errors == group_rules.len() {
                return Err(ValidationError::EngineFailure {
                    group,
                    message: last_error,
                });
            }

            if group == RuleType::Compliance
                && self.config.halt_after_compliance_failure
                && failed_rules
                    .iter()
                    .any(|rule| rule.rule_type == RuleType::Compliance)
            {
                break;
            }
        }

        let fraud_failures = failed_rules
            .iter()
            .filter(|rule| rule.rule_type == RuleType::Fraud)
            .count() as u32;
        let risk_failures = failed_rules
            .iter()
            .filter(|rule| rule.rule_type == RuleType::Risk)
            .count() as u32;

        let status = if failed_rules.is_empty() {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        };

        Ok(ValidationResult {
            validation_id: ValidationId::generate(),
            payment_id: payment_id.clone(),
            tenant: request.tenant.clone(),
            status,
            risk_level: ValidationResult::derive_risk_level(&failed_rules),
            fraud_score: fraud_failures * self.config.fraud_rule_weight,
            risk_score: risk_failures * self.config.risk_rule_weight,
            applied_rules,
            failed_rules,
            validated_at: Utc::now(),
        })
    }
}
