//! The saga orchestrator.
//!
//! Drives one saga at a time per worker: pick the lowest-order pending
//! step, dispatch it through its handler with timeout and transient-retry,
//! persist every transition, and on failure walk the completed steps in
//! reverse invoking compensations. Concurrency across workers is
//! coordinated by the saga's persisted version, never by in-process locks,
//! and no lock is held across a port call.

use crate::error::SagaError;
use crate::handler::{StepContext, StepHandler, StepRegistry};
use crate::instance::{SagaInstance, SagaStatus, StepStatus};
use crate::ports::SagaRepository;
use crate::retry::RetryPolicy;
use chrono::Utc;
use payrail_domain::{CoreError, SagaId, StepId, StoreError, TenantContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Default per-step timeout; templates may override per step.
    pub step_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SagaOrchestrator {
    sagas: Arc<dyn SagaRepository>,
    handlers: StepRegistry,
    config: SagaConfig,
}

impl SagaOrchestrator {
    pub fn new(sagas: Arc<dyn SagaRepository>, handlers: StepRegistry, config: SagaConfig) -> Self {
        Self {
            sagas,
            handlers,
            config,
        }
    }

    /// Advance a saga until it reaches a terminal status.
    ///
    /// Safe to call for an already-terminal saga (returns its status) and
    /// after a crash (resumes from persisted state; step handlers are
    /// idempotent on `(saga_id, step_id)`).
    pub async fn run(
        &self,
        saga_id: &SagaId,
        tenant: &TenantContext,
    ) -> Result<SagaStatus, SagaError> {
        loop {
            let mut saga = self
                .sagas
                .load(saga_id, tenant)
                .await?
                .ok_or_else(|| SagaError::SagaNotFound(saga_id.to_string()))?;

            if saga.is_terminal() {
                return Ok(saga.status);
            }

            match saga.status {
                SagaStatus::Started | SagaStatus::InProgress => {
                    if let Some(reason) = self.injected_failure(&saga) {
                        info!(saga_id = %saga.saga_id, reason = %reason, "injected saga failure");
                        saga.inject_failure(&reason)?;
                        saga.start_compensation()?;
                        self.sagas.save(&mut saga).await?;
                        continue;
                    }
                    let next_step = saga.next_pending_step().map(|step| step.step_id.clone());
                    match next_step {
                        None => {
                            saga.complete()?;
                            self.sagas.save(&mut saga).await?;
                            info!(saga_id = %saga.saga_id, "saga completed");
                            return Ok(SagaStatus::Completed);
                        }
                        Some(step_id) => {
                            self.advance_one_step(saga, &step_id).await?;
                        }
                    }
                }
                SagaStatus::Compensating => {
                    return self.run_compensation(saga).await;
                }
                // Terminal statuses handled above.
                _ => unreachable!("terminal status already returned"),
            }
        }
    }

    /// Resume every non-terminal saga, each on its own worker task.
    pub async fn recover_in_flight(self: Arc<Self>) -> Result<Vec<SagaId>, SagaError> {
        let in_flight = self.sagas.list_in_flight().await?;
        let mut resumed = Vec::with_capacity(in_flight.len());
        for (saga_id, tenant) in in_flight {
            info!(saga_id = %saga_id, "resuming in-flight saga");
            resumed.push(saga_id.clone());
            let orchestrator = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = orchestrator.run(&saga_id, &tenant).await {
                    error!(saga_id = %saga_id, error = %err, "saga recovery run failed");
                }
            });
        }
        Ok(resumed)
    }

    // ── Forward execution ────────────────────────────────────────────

    async fn advance_one_step(
        &self,
        mut saga: SagaInstance,
        step_id: &StepId,
    ) -> Result<(), SagaError> {
        let step = saga
            .step(step_id)
            .cloned()
            .ok_or_else(|| SagaError::InvalidTransition(format!("unknown step '{step_id}'")))?;

        saga.begin_step(step_id)?;
        // Persist IN_PROGRESS before dispatching; a crash after this point
        // is recovered by replaying the idempotent action.
        self.sagas.save(&mut saga).await?;

        let ctx = self.step_context(&saga, step_id, &step.action);
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.step_timeout);

        let (outcome, attempts) = match self.handlers.get(&step.action) {
            Some(handler) => self.execute_with_retry(handler, &ctx, timeout).await,
            None => (
                Err(CoreError::permanent(format!(
                    "no step handler registered for action '{}'",
                    step.action
                ))),
                1,
            ),
        };

        self.apply_step_outcome(saga, step_id, outcome, attempts).await
    }

    /// Record a step outcome, reloading and re-applying on a version
    /// conflict caused by a concurrent flag write (e.g. cancellation). A
    /// step that is no longer IN_PROGRESS after reload means another worker
    /// advanced the saga; that is a real conflict and the caller aborts.
    async fn apply_step_outcome(
        &self,
        mut saga: SagaInstance,
        step_id: &StepId,
        outcome: Result<Value, CoreError>,
        attempts: u32,
    ) -> Result<(), SagaError> {
        for _ in 0..3 {
            match &outcome {
                Ok(result) => {
                    saga.complete_step(step_id, result.clone(), attempts)?;
                }
                Err(err @ CoreError::InvariantViolation(_)) => {
                    error!(
                        saga_id = %saga.saga_id,
                        error = %err,
                        "invariant violation: terminating saga without compensation"
                    );
                    saga.fail_step(step_id, failure_reason(err), attempts)?;
                    saga.mark_failed(failure_reason(err))?;
                }
                Err(err) => {
                    warn!(
                        saga_id = %saga.saga_id,
                        error = %err,
                        "step failed; starting compensation"
                    );
                    saga.fail_step(step_id, failure_reason(err), attempts)?;
                    saga.start_compensation()?;
                }
            }
            match self.sagas.save(&mut saga).await {
                Ok(()) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    let tenant = saga.tenant.clone();
                    let saga_id = saga.saga_id.clone();
                    saga = self
                        .sagas
                        .load(&saga_id, &tenant)
                        .await?
                        .ok_or_else(|| SagaError::SagaNotFound(saga_id.to_string()))?;
                    if saga.step(step_id).map(|s| s.status) != Some(StepStatus::InProgress) {
                        return Err(SagaError::Store(StoreError::VersionConflict {
                            aggregate: format!("saga/{saga_id}"),
                            expected: saga.version,
                            actual: saga.version,
                        }));
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(SagaError::InvalidTransition(
            "persistent version conflicts while recording step outcome".to_string(),
        ))
    }

    async fn execute_with_retry(
        &self,
        handler: Arc<dyn StepHandler>,
        ctx: &StepContext,
        timeout: Duration,
    ) -> (Result<Value, CoreError>, u32) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, handler.execute(ctx)).await {
                Ok(inner) => inner,
                Err(_) => Err(CoreError::transient("TIMEOUT")),
            };
            match result {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if err.is_transient() && !self.config.retry.attempts_exhausted(attempt) => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        saga_id = %ctx.saga_id,
                        step_id = %ctx.step_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient step failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }

    // ── Compensation ─────────────────────────────────────────────────

    async fn run_compensation(&self, mut saga: SagaInstance) -> Result<SagaStatus, SagaError> {
        for step_id in saga.compensation_walk() {
            let step = saga
                .step(&step_id)
                .cloned()
                .ok_or_else(|| SagaError::InvalidTransition(format!("unknown step '{step_id}'")))?;

            // A step already COMPENSATING was interrupted mid-walk; re-drive
            // it without re-entering the transition.
            if step.status == StepStatus::Completed {
                saga.begin_step_compensation(&step_id)?;
                self.sagas.save(&mut saga).await?;
            }

            match &step.compensation_action {
                None => {
                    // Skipped, but recorded for the audit trail.
                    saga.mark_step_compensated(&step_id, "no compensation declared")?;
                }
                Some(action) => {
                    let ctx = self.step_context(&saga, &step_id, action);
                    let original = step.result.clone().unwrap_or(Value::Null);
                    let outcome = match self.handlers.get(action) {
                        Some(handler) => {
                            self.compensate_with_retry(handler, &ctx, &original).await
                        }
                        None => Err(CoreError::permanent(format!(
                            "no step handler registered for compensation '{action}'"
                        ))),
                    };
                    match outcome {
                        Ok(()) => saga.mark_step_compensated(&step_id, "compensated")?,
                        Err(err) => {
                            warn!(
                                saga_id = %saga.saga_id,
                                step = %step.step_name,
                                error = %err,
                                "compensation failed; continuing with remaining steps"
                            );
                            saga.mark_step_compensation_failed(&step_id, err.to_string())?;
                        }
                    }
                }
            }
            self.sagas.save(&mut saga).await?;
        }

        saga.finish_compensation()?;
        self.sagas.save(&mut saga).await?;
        info!(
            saga_id = %saga.saga_id,
            status = saga.status.as_str(),
            compensation_failures = saga.compensation_failures,
            "saga compensation finished"
        );
        Ok(saga.status)
    }

    async fn compensate_with_retry(
        &self,
        handler: Arc<dyn StepHandler>,
        ctx: &StepContext,
        original: &Value,
    ) -> Result<(), CoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match handler.compensate(ctx, original).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && !self.config.retry.attempts_exhausted(attempt) => {
                    tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn injected_failure(&self, saga: &SagaInstance) -> Option<String> {
        if saga.cancel_requested {
            return Some(
                saga.failure_reason
                    .clone()
                    .unwrap_or_else(|| "cancelled by operator".to_string()),
            );
        }
        let elapsed_ms = Utc::now()
            .signed_duration_since(saga.started_at)
            .num_milliseconds();
        if elapsed_ms >= 0 && (elapsed_ms as u64) >= saga.wall_clock_timeout_ms {
            return Some("SAGA_TIMEOUT".to_string());
        }
        None
    }

    fn step_context(&self, saga: &SagaInstance, step_id: &StepId, _action: &str) -> StepContext {
        let prior_results: BTreeMap<String, Value> = saga
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .filter_map(|step| {
                step.result
                    .clone()
                    .map(|result| (step.step_name.clone(), result))
            })
            .collect();
        StepContext {
            saga_id: saga.saga_id.clone(),
            step_id: step_id.clone(),
            tenant: saga.tenant.clone(),
            business_key: saga.business_key.clone(),
            payload: saga.payload.clone(),
            prior_results,
        }
    }
}

fn failure_reason(err: &CoreError) -> String {
    match err {
        CoreError::Transient(message)
        | CoreError::Permanent(message)
        | CoreError::InvariantViolation(message)
        | CoreError::CompensationFailure(message) => message.clone(),
    }
}
