//! Step handler dispatch.

use async_trait::async_trait;
use payrail_domain::{CoreError, PaymentRequest, SagaId, StepId, TenantContext};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything a handler may need to execute or compensate a step. The
/// `(saga_id, step_id)` pair is the idempotency key ports dedupe on.
#[derive(Clone, Debug)]
pub struct StepContext {
    pub saga_id: SagaId,
    pub step_id: StepId,
    pub tenant: TenantContext,
    /// Domain key of the saga (payment id for payment sagas).
    pub business_key: String,
    /// The saga's business payload as written at instantiation.
    pub payload: Value,
    /// Results of previously completed steps, keyed by step name.
    pub prior_results: BTreeMap<String, Value>,
}

impl StepContext {
    /// Deserialize the payload as a payment request. Payment-flow handlers
    /// all work from this.
    pub fn payment_request(&self) -> Result<PaymentRequest, CoreError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CoreError::invariant(format!("malformed saga payload: {e}")))
    }

    pub fn prior_result(&self, step_name: &str) -> Option<&Value> {
        self.prior_results.get(step_name)
    }
}

/// A step's forward action and (optional) compensation. Actions are
/// at-least-once: implementations must tolerate replays of the same
/// `(saga_id, step_id)`.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError>;

    /// Undo a previously completed execution, given its recorded result.
    /// Default is a no-op for steps whose template declares no
    /// compensation action.
    async fn compensate(&self, _ctx: &StepContext, _original: &Value) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Action-name to handler mapping used by the orchestrator.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(action.into(), handler);
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
