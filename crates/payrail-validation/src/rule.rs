//! The rule abstraction and the `RuleContext` data port.

use crate::result::RuleType;
use payrail_domain::{AccountNumber, CoreError, PaymentRequest, TenantContext};
use std::sync::Arc;
use thiserror::Error;

/// Failure of a rule's own evaluation machinery (not of the payment).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RuleError(pub String);

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What a rule concluded about a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Fail { reason: String },
}

impl RuleOutcome {
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
        }
    }
}

/// External data a rule may consult. The engine performs no I/O itself:
/// implementations hand back pre-fetched snapshots (sanctions lists,
/// velocity counters) so evaluation stays deterministic.
pub trait RuleContext: Send + Sync {
    fn is_sanctioned(&self, account: &AccountNumber) -> Result<bool, RuleError>;

    /// Number of payments initiated from the account in the trailing 24h.
    fn payment_velocity(&self, account: &AccountNumber) -> Result<u32, RuleError>;
}

/// A single validation rule. Rules within a group are independent and must
/// be deterministic for a given request and context.
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    fn evaluate(
        &self,
        request: &PaymentRequest,
        context: &dyn RuleContext,
    ) -> Result<RuleOutcome, RuleError>;
}

/// Tenant-scoped rule-set source. Rule order in the returned vector is the
/// declared order and is preserved by the engine as the audit trace.
#[async_trait::async_trait]
pub trait ValidationRulesPort: Send + Sync {
    async fn load(
        &self,
        tenant: &TenantContext,
    ) -> Result<Vec<Arc<dyn ValidationRule>>, CoreError>;
}
