//! Saga instances: running executions of saga templates.
//!
//! A `SagaInstance` owns its steps and its sequence-numbered event trail.
//! Forward progress marks steps completed in order; on failure the
//! orchestrator walks completed steps in reverse and invokes their
//! compensations. Terminal sagas are frozen: no step may be mutated.

use crate::error::SagaError;
use crate::template::SagaTemplate;
use chrono::{DateTime, Utc};
use payrail_domain::{
    Changeset, DomainEvent, EventHeader, SagaEventScope, SagaId, StepId, TenantContext,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Started,
    InProgress,
    Completed,
    Compensating,
    Compensated,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

/// One step of a running saga.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: StepId,
    pub step_name: String,
    pub service_name: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_action: Option<String>,
    pub order: u32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub attempts: u32,
}

impl SagaStep {
    pub fn has_compensation(&self) -> bool {
        self.compensation_action.is_some()
    }
}

/// Sequence-numbered audit record of a saga state change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SagaEvent {
    pub sequence: u64,
    pub event_type: String,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// A running saga. Created on payment initiation, finalized on a terminal
/// status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: SagaId,
    pub template_name: String,
    pub tenant: TenantContext,
    /// Domain key the saga works on (the payment id for payment sagas).
    pub business_key: String,
    pub correlation_id: String,
    pub status: SagaStatus,
    pub steps: Vec<SagaStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub compensation_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub cancel_requested: bool,
    /// Wall-clock budget inherited from the template, in milliseconds.
    pub wall_clock_timeout_ms: u64,
    /// Business payload the step handlers work from (the serialized
    /// payment request for payment sagas).
    pub payload: Value,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Audit trail, sequence-numbered per saga.
    pub trail: Vec<SagaEvent>,
    /// Optimistic concurrency token, incremented by the repository on save.
    #[serde(default)]
    pub version: u64,
    #[serde(skip, default)]
    changeset: Changeset,
}

impl SagaInstance {
    /// Instantiate a saga from a template.
    pub fn from_template(
        template: &SagaTemplate,
        tenant: TenantContext,
        business_key: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        let saga_id = SagaId::generate();
        let business_key = business_key.into();
        let correlation_id = correlation_id.into();

        let steps: Vec<SagaStep> = template
            .steps
            .iter()
            .map(|definition| SagaStep {
                step_id: StepId::generate(),
                step_name: definition.step_name.clone(),
                service_name: definition.service_name.clone(),
                action: definition.action.clone(),
                compensation_action: definition.compensation_action.clone(),
                order: definition.order,
                status: StepStatus::Pending,
                result: None,
                failure_reason: None,
                compensation_result: None,
                timeout_ms: definition.timeout_ms,
                attempts: 0,
            })
            .collect();

        let mut saga = Self {
            saga_id: saga_id.clone(),
            template_name: template.name.clone(),
            tenant,
            business_key,
            correlation_id,
            status: SagaStatus::Started,
            total_steps: steps.len() as u32,
            steps,
            current_step: None,
            completed_steps: 0,
            compensation_failures: 0,
            failure_reason: None,
            cancel_requested: false,
            wall_clock_timeout_ms: template.wall_clock_timeout_ms,
            payload,
            started_at: Utc::now(),
            completed_at: None,
            trail: Vec::new(),
            version: 0,
            changeset: Changeset::default(),
        };
        saga.record("saga_started", format!("Template '{}'", saga.template_name));
        let event = DomainEvent::SagaStarted {
            header: EventHeader::new(saga_id.as_str()),
            scope: saga.scope(),
            template: saga.template_name.clone(),
        };
        saga.changeset.record(event);
        saga
    }

    pub fn scope(&self) -> SagaEventScope {
        SagaEventScope {
            saga_id: self.saga_id.clone(),
            business_key: self.business_key.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The PENDING step with the lowest order, if any.
    pub fn next_pending_step(&self) -> Option<&SagaStep> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .min_by_key(|step| step.order)
    }

    /// Completed steps in strictly reverse order, the compensation walk.
    pub fn completed_steps_reverse(&self) -> Vec<StepId> {
        let mut completed: Vec<&SagaStep> = self
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .collect();
        completed.sort_by(|a, b| b.order.cmp(&a.order));
        completed.into_iter().map(|step| step.step_id.clone()).collect()
    }

    /// Steps still owed a compensation, in reverse order: COMPLETED steps
    /// plus any left COMPENSATING by an interrupted walk.
    pub fn compensation_walk(&self) -> Vec<StepId> {
        let mut owed: Vec<&SagaStep> = self
            .steps
            .iter()
            .filter(|step| {
                matches!(step.status, StepStatus::Completed | StepStatus::Compensating)
            })
            .collect();
        owed.sort_by(|a, b| b.order.cmp(&a.order));
        owed.into_iter().map(|step| step.step_id.clone()).collect()
    }

    pub fn step(&self, step_id: &StepId) -> Option<&SagaStep> {
        self.steps.iter().find(|step| &step.step_id == step_id)
    }

    pub fn step_by_name(&self, step_name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|step| step.step_name == step_name)
    }

    // ── Forward execution ────────────────────────────────────────────

    pub fn begin_step(&mut self, step_id: &StepId) -> Result<(), SagaError> {
        self.require_live()?;
        if !matches!(self.status, SagaStatus::Started | SagaStatus::InProgress) {
            return Err(SagaError::InvalidTransition(format!(
                "cannot execute steps while {}",
                self.status.as_str()
            )));
        }
        let scope = self.scope();
        let step = self.step_mut(step_id)?;
        if step.status != StepStatus::Pending {
            return Err(SagaError::InvalidTransition(format!(
                "step '{}' is not pending",
                step.step_name
            )));
        }
        step.status = StepStatus::InProgress;
        let step_name = step.step_name.clone();
        self.status = SagaStatus::InProgress;
        self.current_step = Some(step_name.clone());
        self.record("step_executing", format!("Step '{step_name}' dispatched"));
        self.changeset.record(DomainEvent::SagaStepExecuted {
            header: EventHeader::new(self.saga_id.as_str()),
            scope,
            step_name,
        });
        Ok(())
    }

    pub fn complete_step(
        &mut self,
        step_id: &StepId,
        result: Value,
        attempts: u32,
    ) -> Result<(), SagaError> {
        self.require_live()?;
        let scope = self.scope();
        let step = self.step_mut(step_id)?;
        if step.status != StepStatus::InProgress {
            return Err(SagaError::InvalidTransition(format!(
                "step '{}' is not in progress",
                step.step_name
            )));
        }
        step.status = StepStatus::Completed;
        step.result = Some(result);
        step.attempts = attempts;
        let step_name = step.step_name.clone();
        self.completed_steps += 1;
        self.record("step_completed", format!("Step '{step_name}' completed"));
        self.changeset.record(DomainEvent::SagaStepCompleted {
            header: EventHeader::new(self.saga_id.as_str()),
            scope,
            step_name,
        });
        Ok(())
    }

    pub fn fail_step(
        &mut self,
        step_id: &StepId,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Result<(), SagaError> {
        self.require_live()?;
        let reason = reason.into();
        let scope = self.scope();
        let step = self.step_mut(step_id)?;
        step.status = StepStatus::Failed;
        step.failure_reason = Some(reason.clone());
        step.attempts = attempts;
        let step_name = step.step_name.clone();
        self.failure_reason = Some(reason.clone());
        self.record(
            "step_failed",
            format!("Step '{step_name}' failed: {reason}"),
        );
        self.changeset.record(DomainEvent::SagaStepFailed {
            header: EventHeader::new(self.saga_id.as_str()),
            scope,
            step_name,
            reason,
        });
        Ok(())
    }

    /// All steps completed.
    pub fn complete(&mut self) -> Result<(), SagaError> {
        self.require_live()?;
        if self.next_pending_step().is_some() || self.completed_steps != self.total_steps {
            return Err(SagaError::InvalidTransition(
                "saga has unfinished steps".to_string(),
            ));
        }
        self.status = SagaStatus::Completed;
        self.current_step = None;
        self.completed_at = Some(Utc::now());
        self.record("saga_completed", "All steps completed");
        self.changeset.record(DomainEvent::SagaCompleted {
            header: EventHeader::new(self.saga_id.as_str()),
            scope: self.scope(),
        });
        Ok(())
    }

    // ── Compensation ─────────────────────────────────────────────────

    pub fn start_compensation(&mut self) -> Result<(), SagaError> {
        self.require_live()?;
        self.status = SagaStatus::Compensating;
        self.current_step = None;
        self.record("compensation_started", "Walking completed steps in reverse");
        self.changeset.record(DomainEvent::SagaCompensationStarted {
            header: EventHeader::new(self.saga_id.as_str()),
            scope: self.scope(),
        });
        Ok(())
    }

    pub fn begin_step_compensation(&mut self, step_id: &StepId) -> Result<(), SagaError> {
        self.require_live()?;
        if self.status != SagaStatus::Compensating {
            return Err(SagaError::InvalidTransition(
                "saga is not compensating".to_string(),
            ));
        }
        let step = self.step_mut(step_id)?;
        if step.status != StepStatus::Completed {
            return Err(SagaError::InvalidTransition(format!(
                "step '{}' was never completed",
                step.step_name
            )));
        }
        step.status = StepStatus::Compensating;
        let step_name = step.step_name.clone();
        self.record(
            "step_compensating",
            format!("Compensating step '{step_name}'"),
        );
        Ok(())
    }

    /// Record a compensated step. Steps without a declared compensation are
    /// marked the same way so the audit trail shows the skip.
    pub fn mark_step_compensated(
        &mut self,
        step_id: &StepId,
        note: impl Into<String>,
    ) -> Result<(), SagaError> {
        self.require_live()?;
        let note = note.into();
        let scope = self.scope();
        let step = self.step_mut(step_id)?;
        if !matches!(
            step.status,
            StepStatus::Compensating | StepStatus::Completed
        ) {
            return Err(SagaError::InvalidTransition(format!(
                "step '{}' cannot be compensated from its current status",
                step.step_name
            )));
        }
        step.status = StepStatus::Compensated;
        step.compensation_result = Some(note.clone());
        let step_name = step.step_name.clone();
        self.record(
            "step_compensated",
            format!("Step '{step_name}': {note}"),
        );
        self.changeset.record(DomainEvent::SagaStepCompensated {
            header: EventHeader::new(self.saga_id.as_str()),
            scope,
            step_name,
        });
        Ok(())
    }

    /// A compensation that could not succeed after retries. Recorded and
    /// counted; the walk continues with the next step.
    pub fn mark_step_compensation_failed(
        &mut self,
        step_id: &StepId,
        reason: impl Into<String>,
    ) -> Result<(), SagaError> {
        self.require_live()?;
        let reason = reason.into();
        let step = self.step_mut(step_id)?;
        step.compensation_result = Some(format!("FAILED: {reason}"));
        let step_name = step.step_name.clone();
        self.compensation_failures += 1;
        self.record(
            "step_compensation_failed",
            format!("Step '{step_name}': {reason}"),
        );
        Ok(())
    }

    /// Close out the compensation walk: COMPENSATED when every compensation
    /// succeeded, FAILED otherwise.
    pub fn finish_compensation(&mut self) -> Result<(), SagaError> {
        self.require_live()?;
        if self.status != SagaStatus::Compensating {
            return Err(SagaError::InvalidTransition(
                "saga is not compensating".to_string(),
            ));
        }
        self.completed_at = Some(Utc::now());
        if self.compensation_failures == 0 {
            self.status = SagaStatus::Compensated;
            self.record("saga_compensated", "All completed steps compensated");
            self.changeset.record(DomainEvent::SagaCompensated {
                header: EventHeader::new(self.saga_id.as_str()),
                scope: self.scope(),
            });
        } else {
            self.status = SagaStatus::Failed;
            let reason = format!(
                "{} compensation action(s) failed",
                self.compensation_failures
            );
            self.record("saga_failed", reason.clone());
            self.changeset.record(DomainEvent::SagaFailed {
                header: EventHeader::new(self.saga_id.as_str()),
                scope: self.scope(),
                reason,
            });
        }
        Ok(())
    }

    /// Terminate without compensation. Used for invariant violations where
    /// the aggregate is suspect.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), SagaError> {
        self.require_live()?;
        let reason = reason.into();
        self.status = SagaStatus::Failed;
        self.failure_reason = Some(reason.clone());
        self.completed_at = Some(Utc::now());
        self.record("saga_failed", reason.clone());
        self.changeset.record(DomainEvent::SagaFailed {
            header: EventHeader::new(self.saga_id.as_str()),
            scope: self.scope(),
            reason,
        });
        Ok(())
    }

    /// Record an injected failure (cancellation, wall-clock expiry) so the
    /// subsequent compensation walk carries its reason.
    pub fn inject_failure(&mut self, reason: impl Into<String>) -> Result<(), SagaError> {
        self.require_live()?;
        let reason = reason.into();
        self.failure_reason = Some(reason.clone());
        self.record("failure_injected", reason);
        Ok(())
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Operator cancellation, observed by the orchestrator at the next step
    /// boundary as an injected failure. Rejected once compensating or
    /// terminal.
    pub fn request_cancel(&mut self, reason: impl Into<String>) -> Result<(), SagaError> {
        if !matches!(self.status, SagaStatus::Started | SagaStatus::InProgress) {
            return Err(SagaError::CancellationRejected(format!(
                "saga is {}",
                self.status.as_str()
            )));
        }
        let reason = reason.into();
        self.cancel_requested = true;
        self.failure_reason = Some(reason.clone());
        self.record("cancel_requested", reason);
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Return pending domain events in emission order and clear the buffer.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.changeset.drain()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn require_live(&self) -> Result<(), SagaError> {
        if self.is_terminal() {
            return Err(SagaError::InvalidTransition(format!(
                "saga is terminal ({})",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn step_mut(&mut self, step_id: &StepId) -> Result<&mut SagaStep, SagaError> {
        self.steps
            .iter_mut()
            .find(|step| &step.step_id == step_id)
            .ok_or_else(|| SagaError::InvalidTransition(format!("unknown step '{step_id}'")))
    }

    fn record(&mut self, event_type: impl Into<String>, detail: impl Into<String>) {
        self.trail.push(SagaEvent {
            sequence: self.trail.len() as u64,
            event_type: event_type.into(),
            detail: detail.into(),
            occurred_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateRegistry;
    use serde_json::json;

    fn make_saga() -> SagaInstance {
        let registry = TemplateRegistry::builtin();
        let template = registry.get("PAYMENT_PROCESSING").unwrap();
        SagaInstance::from_template(
            template,
            TenantContext::new("T1").unwrap().with_business_unit("B1"),
            "pay-1",
            "corr-1",
            json!({}),
        )
    }

    fn drive_step(saga: &mut SagaInstance) -> StepId {
        let step_id = saga.next_pending_step().unwrap().step_id.clone();
        saga.begin_step(&step_id).unwrap();
        saga.complete_step(&step_id, json!({"ok": true}), 1).unwrap();
        step_id
    }

    #[test]
    fn instantiates_all_template_steps_pending() {
        let saga = make_saga();
        assert_eq!(saga.status, SagaStatus::Started);
        assert_eq!(saga.total_steps, 8);
        assert!(saga.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(saga.next_pending_step().unwrap().step_name, "Validate");
    }

    #[test]
    fn forward_execution_to_completion() {
        let mut saga = make_saga();
        for _ in 0..8 {
            drive_step(&mut saga);
        }
        saga.complete().unwrap();

        assert_eq!(saga.status, SagaStatus::Completed);
        assert_eq!(saga.completed_steps, 8);
        assert!(saga.completed_at.is_some());

        let kinds: Vec<_> = saga.drain_events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.first(), Some(&"SagaStarted"));
        assert_eq!(kinds.last(), Some(&"SagaCompleted"));
        assert_eq!(
            kinds.iter().filter(|k| **k == "SagaStepCompleted").count(),
            8
        );
    }

    #[test]
    fn steps_run_in_declared_order() {
        let mut saga = make_saga();
        let mut names = Vec::new();
        for _ in 0..8 {
            names.push(saga.next_pending_step().unwrap().step_name.clone());
            drive_step(&mut saga);
        }
        assert_eq!(
            names,
            vec![
                "Validate",
                "ReserveFunds",
                "DetermineRoute",
                "CreateTransaction",
                "SubmitToClearing",
                "AwaitSettlement",
                "CompleteTransaction",
                "Notify"
            ]
        );
    }

    #[test]
    fn complete_requires_all_steps() {
        let mut saga = make_saga();
        drive_step(&mut saga);
        assert!(saga.complete().is_err());
    }

    #[test]
    fn failure_and_reverse_compensation() {
        let mut saga = make_saga();
        let first = drive_step(&mut saga);
        let second = drive_step(&mut saga);

        let failing = saga.next_pending_step().unwrap().step_id.clone();
        saga.begin_step(&failing).unwrap();
        saga.fail_step(&failing, "routing rejected", 1).unwrap();
        saga.start_compensation().unwrap();

        let reverse = saga.completed_steps_reverse();
        assert_eq!(reverse, vec![second.clone(), first.clone()]);

        for step_id in reverse {
            saga.begin_step_compensation(&step_id).unwrap();
            saga.mark_step_compensated(&step_id, "undone").unwrap();
        }
        saga.finish_compensation().unwrap();

        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(saga.compensation_failures, 0);
        assert_eq!(saga.failure_reason.as_deref(), Some("routing rejected"));

        let kinds: Vec<_> = saga.drain_events().iter().map(|e| e.kind()).collect();
        assert!(kinds.contains(&"SagaCompensationStarted"));
        assert!(kinds.contains(&"SagaCompensated"));
    }

    #[test]
    fn compensation_failure_terminates_in_failed() {
        let mut saga = make_saga();
        let completed = drive_step(&mut saga);
        let failing = saga.next_pending_step().unwrap().step_id.clone();
        saga.begin_step(&failing).unwrap();
        saga.fail_step(&failing, "boom", 1).unwrap();
        saga.start_compensation().unwrap();

        saga.begin_step_compensation(&completed).unwrap();
        saga.mark_step_compensation_failed(&completed, "release refused")
            .unwrap();
        saga.finish_compensation().unwrap();

        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.compensation_failures, 1);
    }

    #[test]
    fn terminal_sagas_are_frozen() {
        let mut saga = make_saga();
        saga.mark_failed("invariant breach").unwrap();
        assert!(saga.is_terminal());

        let step_id = saga.steps[0].step_id.clone();
        assert!(saga.begin_step(&step_id).is_err());
        assert!(saga.mark_failed("again").is_err());
        assert!(saga.request_cancel("too late").is_err());
    }

    #[test]
    fn cannot_compensate_never_completed_step() {
        let mut saga = make_saga();
        let pending = saga.steps[3].step_id.clone();
        drive_step(&mut saga);
        let failing = saga.next_pending_step().unwrap().step_id.clone();
        saga.begin_step(&failing).unwrap();
        saga.fail_step(&failing, "x", 1).unwrap();
        saga.start_compensation().unwrap();

        assert!(saga.begin_step_compensation(&pending).is_err());
    }

    #[test]
    fn cancel_only_while_forward() {
        let mut saga = make_saga();
        saga.request_cancel("operator request").unwrap();
        assert!(saga.cancel_requested);

        let mut compensating = make_saga();
        drive_step(&mut compensating);
        let failing = compensating.next_pending_step().unwrap().step_id.clone();
        compensating.begin_step(&failing).unwrap();
        compensating.fail_step(&failing, "x", 1).unwrap();
        compensating.start_compensation().unwrap();
        assert!(matches!(
            compensating.request_cancel("late"),
            Err(SagaError::CancellationRejected(_))
        ));
    }

    #[test]
    fn trail_sequences_are_monotonic() {
        let mut saga = make_saga();
        drive_step(&mut saga);
        for (index, entry) in saga.trail.iter().enumerate() {
            assert_eq!(entry.sequence, index as u64);
        }
    }
}
