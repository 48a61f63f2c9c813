//! Payrail validation rule engine.
//!
//! Applies an ordered set of business, compliance, fraud and risk rules to a
//! payment request and yields a scored `ValidationResult`. The engine is
//! deterministic and performs no I/O: external data arrives through the
//! injected `RuleContext`, rule sets through `ValidationRulesPort`.

#![deny(unsafe_code)]

pub mod engine;
pub mod result;
pub mod rule;
pub mod rules;

pub use engine::{ValidationEngine, ValidationError};
pub use result::{FailedRule, RiskLevel, RuleType, ValidationResult, ValidationStatus};
pub use rule::{RuleContext, RuleError, RuleOutcome, ValidationRule, ValidationRulesPort};
pub use rules::{standard_rule_set, ValidationConfig};
