//! Routing rules: conditions, operators and actions.

use crate::request::RoutingRequest;
use chrono::{DateTime, Utc};
use payrail_domain::{ClearingSystem, PaymentPriority, TenantContext};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Active,
    Inactive,
    Draft,
    Archived,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    Regex,
    NotRegex,
    IsNull,
    IsNotNull,
}

/// Authoring hint for condition values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Boolean,
}

/// One predicate over a routing request field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingCondition {
    pub field_name: String,
    pub operator: ConditionOperator,
    pub value: String,
    pub value_type: ValueType,
    /// How this condition joins the accumulated result to its left.
    pub logical_operator: LogicalOperator,
    pub negated: bool,
    pub condition_order: u32,
}

impl RoutingCondition {
    pub fn new(
        field_name: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            value: value.into(),
            value_type: ValueType::default(),
            logical_operator: LogicalOperator::And,
            negated: false,
            condition_order: 0,
        }
    }

    pub fn numeric(mut self) -> Self {
        self.value_type = ValueType::Number;
        self
    }

    pub fn joined_with(mut self, operator: LogicalOperator) -> Self {
        self.logical_operator = operator;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negated = true;
        self
    }

    pub fn ordered(mut self, order: u32) -> Self {
        self.condition_order = order;
        self
    }

    /// Evaluate against a request. Null fields satisfy only the null
    /// operators; every other operator is false on null.
    pub fn evaluate(&self, request: &RoutingRequest) -> bool {
        let actual = request.field_value(&self.field_name);
        let raw = match self.operator {
            ConditionOperator::IsNull => actual.is_none(),
            ConditionOperator::IsNotNull => actual.is_some(),
            _ => match actual {
                None => false,
                Some(actual) => self.apply(&actual),
            },
        };
        if self.negated {
            !raw
        } else {
            raw
        }
    }

    fn apply(&self, actual: &str) -> bool {
        match self.operator {
            ConditionOperator::Equals => self.values_equal(actual),
            ConditionOperator::NotEquals => !self.values_equal(actual),
            ConditionOperator::GreaterThan => self.numeric_cmp(actual, |o| o.is_gt()),
            ConditionOperator::LessThan => self.numeric_cmp(actual, |o| o.is_lt()),
            ConditionOperator::GreaterThanOrEquals => self.numeric_cmp(actual, |o| o.is_ge()),
            ConditionOperator::LessThanOrEquals => self.numeric_cmp(actual, |o| o.is_le()),
            ConditionOperator::Contains => lowercase(actual).contains(&lowercase(&self.value)),
            ConditionOperator::NotContains => !lowercase(actual).contains(&lowercase(&self.value)),
            ConditionOperator::In => self.in_list(actual),
            ConditionOperator::NotIn => !self.in_list(actual),
            ConditionOperator::Regex => self.regex_match(actual),
            ConditionOperator::NotRegex => !self.regex_match(actual),
            ConditionOperator::IsNull | ConditionOperator::IsNotNull => unreachable!(),
        }
    }

    fn values_equal(&self, actual: &str) -> bool {
        if self.value_type == ValueType::Number {
            return self.numeric_cmp(actual, |o| o.is_eq());
        }
        match (parse_decimal(actual), parse_decimal(&self.value)) {
            (Some(left), Some(right)) => left == right,
            _ => actual.eq_ignore_ascii_case(&self.value),
        }
    }

    fn numeric_cmp(&self, actual: &str, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
        match (parse_decimal(actual), parse_decimal(&self.value)) {
            (Some(left), Some(right)) => check(left.cmp(&right)),
            _ => false,
        }
    }

    fn in_list(&self, actual: &str) -> bool {
        self.value
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate.eq_ignore_ascii_case(actual))
    }

    fn regex_match(&self, actual: &str) -> bool {
        // Full match: the pattern must cover the whole field value.
        match Regex::new(&format!("^(?:{})$", self.value)) {
            Ok(pattern) => pattern.is_match(actual),
            Err(err) => {
                warn!(
                    field = %self.field_name,
                    pattern = %self.value,
                    error = %err,
                    "unparseable routing condition regex"
                );
                false
            }
        }
    }
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    value.trim().parse::<Decimal>().ok()
}

fn lowercase(value: &str) -> String {
    value.to_ascii_lowercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    RouteToClearingSystem,
    SetPriority,
    AddMetadata,
    RejectPayment,
    HoldPayment,
    Notify,
}

/// One effect of a matched rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingAction {
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clearing_system: Option<ClearingSystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_priority: Option<PaymentPriority>,
    pub parameters: BTreeMap<String, String>,
    pub is_primary: bool,
}

impl RoutingAction {
    pub fn route_to(clearing_system: ClearingSystem) -> Self {
        Self {
            action_type: ActionType::RouteToClearingSystem,
            clearing_system: Some(clearing_system),
            routing_priority: None,
            parameters: BTreeMap::new(),
            is_primary: true,
        }
    }

    pub fn set_priority(priority: PaymentPriority) -> Self {
        Self {
            action_type: ActionType::SetPriority,
            clearing_system: None,
            routing_priority: Some(priority),
            parameters: BTreeMap::new(),
            is_primary: false,
        }
    }

    pub fn add_metadata(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(key.into(), value.into());
        Self {
            action_type: ActionType::AddMetadata,
            clearing_system: None,
            routing_priority: None,
            parameters,
            is_primary: false,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("reason".to_string(), reason.into());
        Self {
            action_type: ActionType::RejectPayment,
            clearing_system: None,
            routing_priority: None,
            parameters,
            is_primary: false,
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("reason".to_string(), reason.into());
        Self {
            action_type: ActionType::HoldPayment,
            clearing_system: None,
            routing_priority: None,
            parameters,
            is_primary: false,
        }
    }

    pub fn notify(target: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("target".to_string(), target.into());
        Self {
            action_type: ActionType::Notify,
            clearing_system: None,
            routing_priority: None,
            parameters,
            is_primary: false,
        }
    }
}

/// A tenant-scoped routing rule. Authored out-of-band; read-mostly here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub rule_name: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_unit: Option<String>,
    pub rule_type: String,
    pub status: RuleStatus,
    /// Lower is more preferred; ties broken by stable id ordering.
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    pub conditions: Vec<RoutingCondition>,
    pub actions: Vec<RoutingAction>,
}

impl RoutingRule {
    pub fn new(id: impl Into<String>, rule_name: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rule_name: rule_name.into(),
            tenant_id: tenant_id.into(),
            business_unit: None,
            rule_type: "ROUTING".to_string(),
            status: RuleStatus::Active,
            priority: 100,
            effective_from: None,
            effective_to: None,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_business_unit(mut self, business_unit: impl Into<String>) -> Self {
        self.business_unit = Some(business_unit.into());
        self
    }

    pub fn with_condition(mut self, condition: RoutingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: RoutingAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_effective_window(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.effective_from = from;
        self.effective_to = to;
        self
    }

    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.effective_from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.effective_to {
            if at > to {
                return false;
            }
        }
        true
    }

    pub fn applies_to(&self, tenant: &TenantContext) -> bool {
        self.tenant_id == tenant.tenant_id()
            && tenant.matches_rule_scope(self.business_unit.as_deref())
    }

    pub fn primary_route(&self) -> Option<&RoutingAction> {
        self.actions.iter().find(|action| {
            action.action_type == ActionType::RouteToClearingSystem && action.is_primary
        })
    }

    /// Conditions combined left-to-right in declared order; each condition's
    /// logical operator joins it to the accumulated result, OR skipping
    /// evaluation once true and AND once false. A rule with no conditions
    /// matches every request.
    pub fn matches(&self, request: &RoutingRequest) -> bool {
        let mut ordered: Vec<&RoutingCondition> = self.conditions.iter().collect();
        ordered.sort_by_key(|condition| condition.condition_order);

        let mut iter = ordered.into_iter();
        let mut acc = match iter.next() {
            Some(first) => first.evaluate(request),
            None => return true,
        };
        for condition in iter {
            acc = match condition.logical_operator {
                LogicalOperator::And => {
                    if !acc {
                        false
                    } else {
                        condition.evaluate(request)
                    }
                }
                LogicalOperator::Or => {
                    if acc {
                        true
                    } else {
                        condition.evaluate(request)
                    }
                }
            };
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use payrail_domain::{
        AccountNumber, Currency, IdempotencyKey, Money, PaymentId, PaymentRequest, PaymentType,
    };
    use rust_decimal_macros::dec;

    fn make_request(amount: Decimal) -> RoutingRequest {
        let payment = PaymentRequest::new(
            IdempotencyKey::new("K-1").unwrap(),
            TenantContext::new("T1").unwrap().with_business_unit("B1"),
            AccountNumber::new("111").unwrap(),
            AccountNumber::new("222").unwrap(),
            Money::new(amount, Currency::new("ZAR").unwrap()),
            "Invoice 42",
            PaymentType::Eft,
            "tester",
        )
        .with_metadata("channel", "Mobile");
        RoutingRequest::from_payment(PaymentId::new("pay-1").unwrap(), &payment)
    }

    fn condition(
        field: &str,
        operator: ConditionOperator,
        value: &str,
    ) -> RoutingCondition {
        RoutingCondition::new(field, operator, value)
    }

    #[test]
    fn operator_table() {
        let request = make_request(dec!(1000));

        let cases = [
            (condition("paymentType", ConditionOperator::Equals, "eft"), true),
            (condition("paymentType", ConditionOperator::NotEquals, "RTC"), true),
            (condition("amount", ConditionOperator::GreaterThan, "999.99").numeric(), true),
            (condition("amount", ConditionOperator::LessThan, "1000").numeric(), false),
            (condition("amount", ConditionOperator::GreaterThanOrEquals, "1000").numeric(), true),
            (condition("amount", ConditionOperator::LessThanOrEquals, "1000").numeric(), true),
            (condition("channel", ConditionOperator::Contains, "OBI"), true),
            (condition("channel", ConditionOperator::NotContains, "web"), true),
            (condition("currency", ConditionOperator::In, "zar, usd"), true),
            (condition("currency", ConditionOperator::NotIn, "usd,eur"), true),
            (condition("sourceAccount", ConditionOperator::Regex, "[0-9]+"), true),
            (condition("sourceAccount", ConditionOperator::NotRegex, "[a-z]+"), true),
            (condition("no-field", ConditionOperator::IsNull, ""), true),
            (condition("currency", ConditionOperator::IsNotNull, ""), true),
        ];
        for (cond, expected) in cases {
            assert_eq!(cond.evaluate(&request), expected, "{:?}", cond.operator);
        }
    }

    #[test]
    fn null_fields_fail_every_non_null_operator() {
        let request = make_request(dec!(10));
        assert!(!condition("missing", ConditionOperator::Equals, "x").evaluate(&request));
        assert!(!condition("missing", ConditionOperator::Regex, ".*").evaluate(&request));
        assert!(!condition("missing", ConditionOperator::LessThan, "5").evaluate(&request));
    }

    #[test]
    fn numeric_equality_ignores_formatting() {
        let request = make_request(dec!(1000.00));
        assert!(condition("amount", ConditionOperator::Equals, "1000").evaluate(&request));
    }

    #[test]
    fn negation_inverts() {
        let request = make_request(dec!(10));
        assert!(!condition("currency", ConditionOperator::Equals, "ZAR")
            .negated()
            .evaluate(&request));
        assert!(condition("missing", ConditionOperator::IsNotNull, "")
            .negated()
            .evaluate(&request));
    }

    #[test]
    fn regex_requires_full_match() {
        let request = make_request(dec!(10));
        assert!(!condition("sourceAccount", ConditionOperator::Regex, "1").evaluate(&request));
        assert!(condition("sourceAccount", ConditionOperator::Regex, "1{3}").evaluate(&request));
    }

    #[test]
    fn invalid_regex_is_false_not_fatal() {
        let request = make_request(dec!(10));
        assert!(!condition("currency", ConditionOperator::Regex, "(unclosed").evaluate(&request));
    }

    #[test]
    fn and_or_fold_left_to_right() {
        let request = make_request(dec!(1000));

        // false AND x OR true => true (no precedence, left-to-right)
        let rule = RoutingRule::new("r1", "mixed", "T1")
            .with_condition(condition("currency", ConditionOperator::Equals, "USD").ordered(0))
            .with_condition(
                condition("amount", ConditionOperator::GreaterThan, "1")
                    .numeric()
                    .ordered(1),
            )
            .with_condition(
                condition("paymentType", ConditionOperator::Equals, "EFT")
                    .joined_with(LogicalOperator::Or)
                    .ordered(2),
            );
        assert!(rule.matches(&request));

        let all_and = RoutingRule::new("r2", "ands", "T1")
            .with_condition(condition("currency", ConditionOperator::Equals, "ZAR").ordered(0))
            .with_condition(
                condition("amount", ConditionOperator::LessThanOrEquals, "5000")
                    .numeric()
                    .ordered(1),
            );
        assert!(all_and.matches(&request));
    }

    #[test]
    fn condition_order_controls_evaluation_sequence() {
        let request = make_request(dec!(1000));
        // Declared out of order: the OR (order 0) seeds the fold.
        let rule = RoutingRule::new("r3", "ordered", "T1")
            .with_condition(
                condition("currency", ConditionOperator::Equals, "USD")
                    .joined_with(LogicalOperator::And)
                    .ordered(1),
            )
            .with_condition(condition("paymentType", ConditionOperator::Equals, "EFT").ordered(0));
        // EFT (true) AND USD (false) => false
        assert!(!rule.matches(&request));
    }

    #[test]
    fn empty_conditions_match_everything() {
        assert!(RoutingRule::new("r4", "catch-all", "T1").matches(&make_request(dec!(5))));
    }

    #[test]
    fn effective_window() {
        let now = Utc::now();
        let rule = RoutingRule::new("r5", "windowed", "T1").with_effective_window(
            Some(now - Duration::hours(1)),
            Some(now + Duration::hours(1)),
        );
        assert!(rule.is_effective_at(now));
        assert!(!rule.is_effective_at(now + Duration::hours(2)));
        assert!(!rule.is_effective_at(now - Duration::hours(2)));
    }

    #[test]
    fn tenant_scoping() {
        let rule = RoutingRule::new("r6", "scoped", "T1").with_business_unit("B1");
        let in_scope = TenantContext::new("T1").unwrap().with_business_unit("B1");
        let wrong_unit = TenantContext::new("T1").unwrap().with_business_unit("B2");
        let wrong_tenant = TenantContext::new("T2").unwrap().with_business_unit("B1");
        assert!(rule.applies_to(&in_scope));
        assert!(!rule.applies_to(&wrong_unit));
        assert!(!rule.applies_to(&wrong_tenant));
    }
}
