//! Saga templates: declarative step plans instantiated per business
//! transaction.

use std::collections::HashMap;

/// Step action names, shared between templates and the handler registry.
pub mod actions {
    pub const VALIDATE_PAYMENT: &str = "validate_payment";
    pub const RESERVE_FUNDS: &str = "reserve_funds";
    pub const RELEASE_FUNDS: &str = "release_funds";
    pub const DETERMINE_ROUTE: &str = "determine_route";
    pub const CREATE_TRANSACTION: &str = "create_transaction";
    pub const FAIL_TRANSACTION: &str = "fail_transaction";
    pub const SUBMIT_TO_CLEARING: &str = "submit_to_clearing";
    pub const REVERSE_CLEARING: &str = "reverse_clearing";
    pub const AWAIT_SETTLEMENT: &str = "await_settlement";
    pub const CANCEL_SETTLEMENT: &str = "cancel_settlement";
    pub const COMPLETE_TRANSACTION: &str = "complete_transaction";
    pub const FAIL_TRANSACTION_POST_COMPLETE: &str = "fail_transaction_post_complete";
    pub const NOTIFY_COMPLETION: &str = "notify_completion";
}

/// One declared step of a template.
#[derive(Clone, Debug)]
pub struct StepDefinition {
    pub step_name: String,
    pub service_name: String,
    pub action: String,
    pub compensation_action: Option<String>,
    pub order: u32,
    /// Per-step timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    pub fn new(
        order: u32,
        step_name: impl Into<String>,
        service_name: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            service_name: service_name.into(),
            action: action.into(),
            compensation_action: None,
            order,
            timeout_ms: None,
        }
    }

    pub fn compensated_by(mut self, action: impl Into<String>) -> Self {
        self.compensation_action = Some(action.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// An ordered step plan.
#[derive(Clone, Debug)]
pub struct SagaTemplate {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    /// Per-saga wall-clock budget in milliseconds.
    pub wall_clock_timeout_ms: u64,
}

impl SagaTemplate {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
            wall_clock_timeout_ms: 300_000,
        }
    }

    pub fn with_wall_clock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.wall_clock_timeout_ms = timeout_ms;
        self
    }

    /// The payment processing plan: validate, reserve, route, post, clear,
    /// settle, complete, notify.
    pub fn payment_processing() -> Self {
        Self::new(
            "PAYMENT_PROCESSING",
            vec![
                StepDefinition::new(1, "Validate", "validation-engine", actions::VALIDATE_PAYMENT),
                StepDefinition::new(2, "ReserveFunds", "account-adapter", actions::RESERVE_FUNDS)
                    .compensated_by(actions::RELEASE_FUNDS),
                StepDefinition::new(3, "DetermineRoute", "routing-engine", actions::DETERMINE_ROUTE),
                StepDefinition::new(
                    4,
                    "CreateTransaction",
                    "transaction-core",
                    actions::CREATE_TRANSACTION,
                )
                .compensated_by(actions::FAIL_TRANSACTION),
                StepDefinition::new(
                    5,
                    "SubmitToClearing",
                    "clearing-adapter",
                    actions::SUBMIT_TO_CLEARING,
                )
                .compensated_by(actions::REVERSE_CLEARING),
                StepDefinition::new(6, "AwaitSettlement", "settlement", actions::AWAIT_SETTLEMENT)
                    .compensated_by(actions::CANCEL_SETTLEMENT),
                StepDefinition::new(
                    7,
                    "CompleteTransaction",
                    "transaction-core",
                    actions::COMPLETE_TRANSACTION,
                )
                .compensated_by(actions::FAIL_TRANSACTION_POST_COMPLETE),
                StepDefinition::new(8, "Notify", "notification", actions::NOTIFY_COMPLETION),
            ],
        )
    }

    /// Reversal of an already-settled transaction.
    pub fn transaction_reversal() -> Self {
        Self::new(
            "TRANSACTION_REVERSAL",
            vec![
                StepDefinition::new(1, "Validate", "validation-engine", actions::VALIDATE_PAYMENT),
                StepDefinition::new(
                    2,
                    "CreateTransaction",
                    "transaction-core",
                    actions::CREATE_TRANSACTION,
                )
                .compensated_by(actions::FAIL_TRANSACTION),
                StepDefinition::new(
                    3,
                    "SubmitToClearing",
                    "clearing-adapter",
                    actions::SUBMIT_TO_CLEARING,
                )
                .compensated_by(actions::REVERSE_CLEARING),
                StepDefinition::new(
                    4,
                    "CompleteTransaction",
                    "transaction-core",
                    actions::COMPLETE_TRANSACTION,
                ),
                StepDefinition::new(5, "Notify", "notification", actions::NOTIFY_COMPLETION),
            ],
        )
    }

    /// Account attribute update with funds impact.
    pub fn account_update() -> Self {
        Self::new(
            "ACCOUNT_UPDATE",
            vec![
                StepDefinition::new(1, "Validate", "validation-engine", actions::VALIDATE_PAYMENT),
                StepDefinition::new(2, "ReserveFunds", "account-adapter", actions::RESERVE_FUNDS)
                    .compensated_by(actions::RELEASE_FUNDS),
                StepDefinition::new(3, "Notify", "notification", actions::NOTIFY_COMPLETION),
            ],
        )
    }

    /// Settlement confirmation for an already-cleared transaction.
    pub fn settlement() -> Self {
        Self::new(
            "SETTLEMENT",
            vec![
                StepDefinition::new(1, "AwaitSettlement", "settlement", actions::AWAIT_SETTLEMENT)
                    .compensated_by(actions::CANCEL_SETTLEMENT),
                StepDefinition::new(
                    2,
                    "CompleteTransaction",
                    "transaction-core",
                    actions::COMPLETE_TRANSACTION,
                ),
                StepDefinition::new(3, "Notify", "notification", actions::NOTIFY_COMPLETION),
            ],
        )
    }

    /// End-of-day reconciliation sweep.
    pub fn reconciliation() -> Self {
        Self::new(
            "RECONCILIATION",
            vec![
                StepDefinition::new(1, "Validate", "validation-engine", actions::VALIDATE_PAYMENT),
                StepDefinition::new(2, "AwaitSettlement", "settlement", actions::AWAIT_SETTLEMENT),
                StepDefinition::new(3, "Notify", "notification", actions::NOTIFY_COMPLETION),
            ],
        )
        .with_wall_clock_timeout_ms(900_000)
    }

    /// Batched payment submission.
    pub fn batch_processing() -> Self {
        Self::new(
            "BATCH_PROCESSING",
            vec![
                StepDefinition::new(1, "Validate", "validation-engine", actions::VALIDATE_PAYMENT),
                StepDefinition::new(2, "ReserveFunds", "account-adapter", actions::RESERVE_FUNDS)
                    .compensated_by(actions::RELEASE_FUNDS),
                StepDefinition::new(
                    3,
                    "SubmitToClearing",
                    "clearing-adapter",
                    actions::SUBMIT_TO_CLEARING,
                )
                .compensated_by(actions::REVERSE_CLEARING),
                StepDefinition::new(4, "Notify", "notification", actions::NOTIFY_COMPLETION),
            ],
        )
        .with_wall_clock_timeout_ms(600_000)
    }
}

/// Registry of known templates.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, SagaTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in templates.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SagaTemplate::payment_processing());
        registry.register(SagaTemplate::account_update());
        registry.register(SagaTemplate::transaction_reversal());
        registry.register(SagaTemplate::settlement());
        registry.register(SagaTemplate::reconciliation());
        registry.register(SagaTemplate::batch_processing());
        registry
    }

    pub fn register(&mut self, template: SagaTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&SagaTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_template_declares_eight_ordered_steps() {
        let template = SagaTemplate::payment_processing();
        assert_eq!(template.steps.len(), 8);
        let orders: Vec<_> = template.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn pure_steps_have_no_compensation() {
        let template = SagaTemplate::payment_processing();
        let by_name = |name: &str| {
            template
                .steps
                .iter()
                .find(|s| s.step_name == name)
                .unwrap()
        };
        assert!(by_name("Validate").compensation_action.is_none());
        assert!(by_name("DetermineRoute").compensation_action.is_none());
        assert!(by_name("Notify").compensation_action.is_none());
        assert_eq!(
            by_name("ReserveFunds").compensation_action.as_deref(),
            Some(actions::RELEASE_FUNDS)
        );
        assert_eq!(
            by_name("SubmitToClearing").compensation_action.as_deref(),
            Some(actions::REVERSE_CLEARING)
        );
    }

    #[test]
    fn builtin_registry_has_all_templates() {
        let registry = TemplateRegistry::builtin();
        for name in [
            "PAYMENT_PROCESSING",
            "ACCOUNT_UPDATE",
            "TRANSACTION_REVERSAL",
            "SETTLEMENT",
            "RECONCILIATION",
            "BATCH_PROCESSING",
        ] {
            assert!(registry.get(name).is_some(), "missing template {name}");
        }
        assert!(registry.get("UNKNOWN").is_none());
    }
}
