//! Payrail routing decision engine.
//!
//! Evaluates tenant-scoped routing rules (conditions + actions) concurrently
//! and returns a `RoutingDecision`: target clearing system, priority,
//! rejection/hold flags, metadata and notifications. One misbehaving rule is
//! skipped with a warning and never fails the evaluation.

#![deny(unsafe_code)]

pub mod cache;
pub mod decision;
pub mod engine;
pub mod request;
pub mod rule;

pub use cache::{DecisionCache, RuleCache};
pub use decision::RoutingDecision;
pub use engine::{RoutingConfig, RoutingEngine, RoutingError, RoutingRulesPort};
pub use request::RoutingRequest;
pub use rule::{
    ActionType, ConditionOperator, LogicalOperator, RoutingAction, RoutingCondition, RoutingRule,
    RuleStatus, ValueType,
};
