//! The standard rule set applied to every payment.

use crate::result::RuleType;
use crate::rule::{RuleContext, RuleError, RuleOutcome, ValidationRule};
use payrail_domain::PaymentRequest;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Weights and thresholds for the standard rules and for result scoring.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Score contribution per failed FRAUD rule.
    pub fraud_rule_weight: u32,
    /// Score contribution per failed RISK rule.
    pub risk_rule_weight: u32,
    /// Largest amount a single payment may carry.
    pub single_payment_limit: Decimal,
    /// Amounts at or above this are flagged as elevated risk.
    pub elevated_risk_threshold: Decimal,
    /// Max payments from one account in the trailing 24h.
    pub velocity_ceiling: u32,
    /// Stop evaluating fraud/risk groups once a compliance rule has failed.
    pub halt_after_compliance_failure: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fraud_rule_weight: 25,
            risk_rule_weight: 20,
            single_payment_limit: Decimal::from(100_000),
            elevated_risk_threshold: Decimal::from(50_000),
            velocity_ceiling: 20,
            halt_after_compliance_failure: false,
        }
    }
}

/// BUSINESS: the amount must be strictly positive.
pub struct PositiveAmountRule;

impl ValidationRule for PositiveAmountRule {
    fn name(&self) -> &str {
        "positive-amount"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Business
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        _context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        if request.amount.is_positive() {
            Ok(RuleOutcome::Pass)
        } else {
            Ok(RuleOutcome::fail("Payment amount must be positive"))
        }
    }
}

/// BUSINESS: source and destination accounts must differ.
pub struct DistinctAccountsRule;

impl ValidationRule for DistinctAccountsRule {
    fn name(&self) -> &str {
        "distinct-accounts"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Business
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        _context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        if request.source_account == request.destination_account {
            Ok(RuleOutcome::fail(
                "Source and destination accounts must differ",
            ))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// BUSINESS: single-payment limit.
pub struct PaymentLimitRule {
    pub limit: Decimal,
}

impl ValidationRule for PaymentLimitRule {
    fn name(&self) -> &str {
        "single-payment-limit"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Business
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        _context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        if request.amount.amount() > self.limit {
            Ok(RuleOutcome::fail(format!(
                "Amount {} exceeds single payment limit {}",
                request.amount.amount(),
                self.limit
            )))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// COMPLIANCE: a payment reference is mandatory.
pub struct ReferenceRequiredRule;

impl ValidationRule for ReferenceRequiredRule {
    fn name(&self) -> &str {
        "reference-required"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Compliance
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        _context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        if request.reference.trim().is_empty() {
            Ok(RuleOutcome::fail("Payment reference is required"))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// COMPLIANCE: neither party may be on the sanctions list.
pub struct SanctionsScreeningRule;

impl ValidationRule for SanctionsScreeningRule {
    fn name(&self) -> &str {
        "sanctions-screening"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Compliance
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        for account in [&request.source_account, &request.destination_account] {
            if context.is_sanctioned(account)? {
                return Ok(RuleOutcome::fail(format!(
                    "Account {account} matched a sanctions entry"
                )));
            }
        }
        Ok(RuleOutcome::Pass)
    }
}

/// FRAUD: per-account velocity ceiling over the trailing 24h.
pub struct VelocityRule {
    pub ceiling: u32,
}

impl ValidationRule for VelocityRule {
    fn name(&self) -> &str {
        "velocity-ceiling"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Fraud
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        let velocity = context.payment_velocity(&request.source_account)?;
        if velocity >= self.ceiling {
            Ok(RuleOutcome::fail(format!(
                "Account exceeded velocity ceiling: {velocity} payments in 24h"
            )))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// RISK: large amounts are flagged for elevated risk.
pub struct LargeAmountRiskRule {
    pub threshold: Decimal,
}

impl ValidationRule for LargeAmountRiskRule {
    fn name(&self) -> &str {
        "large-amount-risk"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Risk
    }

    fn evaluate(
        &self,
        request: &PaymentRequest,
        _context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError> {
        if request.amount.amount() >= self.threshold {
            Ok(RuleOutcome::fail(format!(
                "Amount {} at or above elevated risk threshold {}",
                request.amount.amount(),
                self.threshold
            )))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// The production default rule set, in declared order.
pub fn standard_rule_set(config: &ValidationConfig) -> Vec<Arc<dyn ValidationRule>> {
    vec![
        Arc::new(PositiveAmountRule),
        Arc::new(DistinctAccountsRule),
        Arc::new(PaymentLimitRule {
            limit: config.single_payment_limit,
        }),
        Arc::new(ReferenceRequiredRule),
        Arc::new(SanctionsScreeningRule),
        Arc::new(VelocityRule {
            ceiling: config.velocity_ceiling,
        }),
        Arc::new(LargeAmountRiskRule {
            threshold: config.elevated_risk_threshold,
        }),
    ]
}
