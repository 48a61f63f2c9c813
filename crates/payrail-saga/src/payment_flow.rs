//! Step handlers for the payment processing template.
//!
//! Each handler adapts one saga step to the engine or port that does the
//! work, keeps the payment aggregate's status in step with the flow, and
//! tolerates replays of the same `(saga_id, step_id)` pair.

use crate::handler::{StepContext, StepHandler, StepRegistry};
use crate::ports::{
    AccountAdapter, ClearingAdapter, NotificationPort, PaymentRepository, Reservation,
    SettlementPort,
};
use crate::template::actions;
use async_trait::async_trait;
use payrail_domain::{CoreError, Payment, PaymentId, TenantContext};
use payrail_ledger::{CreateTransaction, Transaction, TransactionRepository};
use payrail_routing::{RoutingDecision, RoutingEngine, RoutingRequest};
use payrail_validation::ValidationEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Everything the payment flow needs. Engines are part of the core; the
/// rest are adapter-implemented ports.
pub struct PaymentFlowDeps {
    pub validation: Arc<ValidationEngine>,
    pub routing: Arc<RoutingEngine>,
    pub payments: Arc<dyn PaymentRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub accounts: Arc<dyn AccountAdapter>,
    pub clearing: Arc<dyn ClearingAdapter>,
    pub settlement: Arc<dyn SettlementPort>,
    pub notifications: Arc<dyn NotificationPort>,
    /// Budget handed to `SettlementPort::wait_for`.
    pub settlement_wait: Duration,
}

/// Build the handler registry for the payment processing template.
pub fn payment_step_registry(deps: Arc<PaymentFlowDeps>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(actions::VALIDATE_PAYMENT, Arc::new(ValidateHandler(deps.clone())));
    let reserve = Arc::new(ReserveFundsHandler(deps.clone()));
    registry.register(actions::RESERVE_FUNDS, reserve.clone());
    registry.register(actions::RELEASE_FUNDS, reserve);
    registry.register(actions::DETERMINE_ROUTE, Arc::new(RouteHandler(deps.clone())));
    let create = Arc::new(CreateTransactionHandler(deps.clone()));
    registry.register(actions::CREATE_TRANSACTION, create.clone());
    registry.register(actions::FAIL_TRANSACTION, create);
    let submit = Arc::new(SubmitToClearingHandler(deps.clone()));
    registry.register(actions::SUBMIT_TO_CLEARING, submit.clone());
    registry.register(actions::REVERSE_CLEARING, submit);
    let settle = Arc::new(AwaitSettlementHandler(deps.clone()));
    registry.register(actions::AWAIT_SETTLEMENT, settle.clone());
    registry.register(actions::CANCEL_SETTLEMENT, settle);
    let complete = Arc::new(CompleteTransactionHandler(deps.clone()));
    registry.register(actions::COMPLETE_TRANSACTION, complete.clone());
    registry.register(actions::FAIL_TRANSACTION_POST_COMPLETE, complete);
    registry.register(actions::NOTIFY_COMPLETION, Arc::new(NotifyHandler(deps)));
    registry
}

fn payment_id_of(ctx: &StepContext) -> Result<PaymentId, CoreError> {
    PaymentId::new(ctx.business_key.clone()).map_err(CoreError::from)
}

async fn load_payment(
    payments: &Arc<dyn PaymentRepository>,
    payment_id: &PaymentId,
    tenant: &TenantContext,
) -> Result<Payment, CoreError> {
    payments
        .load(payment_id, tenant)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::invariant(format!("payment '{payment_id}' vanished mid-saga")))
}

async fn load_transaction(
    transactions: &Arc<dyn TransactionRepository>,
    payment_id: &PaymentId,
    tenant: &TenantContext,
) -> Result<Transaction, CoreError> {
    transactions
        .find_by_payment(payment_id, tenant)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| {
            CoreError::invariant(format!("no transaction recorded for payment '{payment_id}'"))
        })
}

fn parse_result<T: serde::de::DeserializeOwned>(
    step_name: &str,
    value: &Value,
) -> Result<T, CoreError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CoreError::invariant(format!("malformed '{step_name}' step result: {e}")))
}

// ── 1. Validate ──────────────────────────────────────────────────────

struct ValidateHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for ValidateHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let request = ctx.payment_request()?;
        let payment_id = payment_id_of(ctx)?;
        let result = self
            .0
            .validation
            .validate(&payment_id, &request)
            .await
            .map_err(CoreError::from)?;

        if !result.passed() {
            let reason = result
                .first_failure_reason()
                .unwrap_or("validation failed")
                .to_string();
            return Err(CoreError::permanent(reason));
        }

        let mut payment = load_payment(&self.0.payments, &payment_id, &ctx.tenant).await?;
        // Replays land here with the payment already past INITIATED.
        if payment.status == payrail_domain::PaymentStatus::Initiated {
            payment.mark_validated().map_err(CoreError::from)?;
            self.0
                .payments
                .save(&mut payment, None)
                .await
                .map_err(CoreError::from)?;
        }

        serde_json::to_value(&result)
            .map_err(|e| CoreError::invariant(format!("unserializable validation result: {e}")))
    }
}

// ── 2. ReserveFunds ──────────────────────────────────────────────────

struct ReserveFundsHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for ReserveFundsHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let request = ctx.payment_request()?;
        let reservation = self
            .0
            .accounts
            .reserve(
                &request.source_account,
                &request.amount,
                &ctx.saga_id,
                &ctx.step_id,
            )
            .await?;
        serde_json::to_value(&reservation)
            .map_err(|e| CoreError::invariant(format!("unserializable reservation: {e}")))
    }

    async fn compensate(&self, ctx: &StepContext, original: &Value) -> Result<(), CoreError> {
        let reservation: Reservation = parse_result("ReserveFunds", original)?;
        self.0
            .accounts
            .release(&reservation.reservation_id, &ctx.saga_id, &ctx.step_id)
            .await
    }
}

// ── 3. DetermineRoute ────────────────────────────────────────────────

struct RouteHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for RouteHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let request = ctx.payment_request()?;
        let payment_id = payment_id_of(ctx)?;
        let routing_request = RoutingRequest::from_payment(payment_id.clone(), &request);
        let decision = self
            .0
            .routing
            .evaluate(&routing_request)
            .await
            .map_err(CoreError::from)?;

        if decision.held {
            let mut payment = load_payment(&self.0.payments, &payment_id, &ctx.tenant).await?;
            if payment.status != payrail_domain::PaymentStatus::Held {
                payment.hold(&decision.decision_reason).map_err(CoreError::from)?;
                self.0
                    .payments
                    .save(&mut payment, None)
                    .await
                    .map_err(CoreError::from)?;
            }
            return Err(CoreError::permanent(decision.decision_reason));
        }
        if decision.rejected {
            return Err(CoreError::permanent(decision.decision_reason));
        }

        if decision.priority != request.priority {
            let mut payment = load_payment(&self.0.payments, &payment_id, &ctx.tenant).await?;
            payment.override_priority(decision.priority);
            self.0
                .payments
                .save(&mut payment, None)
                .await
                .map_err(CoreError::from)?;
        }

        serde_json::to_value(&decision)
            .map_err(|e| CoreError::invariant(format!("unserializable routing decision: {e}")))
    }
}

// ── 4. CreateTransaction ─────────────────────────────────────────────

struct CreateTransactionHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for CreateTransactionHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let request = ctx.payment_request()?;
        let payment_id = payment_id_of(ctx)?;

        // Replay: the transaction already exists from a previous attempt.
        if let Some(existing) = self
            .0
            .transactions
            .find_by_payment(&payment_id, &ctx.tenant)
            .await
            .map_err(CoreError::from)?
        {
            return Ok(json!({ "transaction_id": existing.transaction_id }));
        }

        let reservation: Reservation = ctx
            .prior_result("ReserveFunds")
            .ok_or_else(|| CoreError::invariant("funds were never reserved"))
            .and_then(|value| parse_result("ReserveFunds", value))?;
        let credit_opening = self.0.accounts.balance(&request.destination_account).await?;

        let mut transaction = Transaction::create(CreateTransaction {
            payment_id,
            tenant: ctx.tenant.clone(),
            debit_account: request.source_account.clone(),
            credit_account: request.destination_account.clone(),
            amount: request.amount.clone(),
            debit_opening_balance: reservation.balance_before,
            credit_opening_balance: credit_opening,
        })
        .map_err(CoreError::from)?;
        transaction.start_processing().map_err(CoreError::from)?;
        self.0
            .transactions
            .save(&mut transaction)
            .await
            .map_err(CoreError::from)?;

        Ok(json!({ "transaction_id": transaction.transaction_id }))
    }

    async fn compensate(&self, ctx: &StepContext, _original: &Value) -> Result<(), CoreError> {
        let payment_id = payment_id_of(ctx)?;
        let mut transaction =
            load_transaction(&self.0.transactions, &payment_id, &ctx.tenant).await?;
        if transaction.status.is_terminal() {
            return Ok(());
        }
        transaction.fail("compensation").map_err(CoreError::from)?;
        self.0
            .transactions
            .save(&mut transaction)
            .await
            .map_err(CoreError::from)
    }
}

// ── 5. SubmitToClearing ──────────────────────────────────────────────

struct SubmitToClearingHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for SubmitToClearingHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let payment_id = payment_id_of(ctx)?;
        let mut transaction =
            load_transaction(&self.0.transactions, &payment_id, &ctx.tenant).await?;

        // Replay: the earlier attempt was acknowledged before the crash.
        if let Some(reference) = transaction.clearing_reference.clone() {
            return Ok(json!({ "clearing_reference": reference }));
        }

        let decision: RoutingDecision = ctx
            .prior_result("DetermineRoute")
            .ok_or_else(|| CoreError::invariant("no routing decision recorded"))
            .and_then(|value| parse_result("DetermineRoute", value))?;

        let reference = self
            .0
            .clearing
            .submit(
                &transaction,
                &decision.clearing_system,
                &ctx.saga_id,
                &ctx.step_id,
            )
            .await?;
        transaction
            .mark_cleared(decision.clearing_system.clone(), &reference)
            .map_err(CoreError::from)?;
        self.0
            .transactions
            .save(&mut transaction)
            .await
            .map_err(CoreError::from)?;

        let mut payment = load_payment(&self.0.payments, &payment_id, &ctx.tenant).await?;
        if payment.status == payrail_domain::PaymentStatus::Validated {
            payment.start_clearing().map_err(CoreError::from)?;
            self.0
                .payments
                .save(&mut payment, None)
                .await
                .map_err(CoreError::from)?;
        }

        Ok(json!({ "clearing_reference": reference }))
    }

    /// Reverse only an acknowledged submission: the recorded result exists
    /// iff the clearing system handed back a reference.
    async fn compensate(&self, ctx: &StepContext, original: &Value) -> Result<(), CoreError> {
        let reference = original
            .get("clearing_reference")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invariant("clearing reference missing from step result"))?;
        self.0
            .clearing
            .reverse(reference, &ctx.saga_id, &ctx.step_id)
            .await
    }
}

// ── 6. AwaitSettlement ───────────────────────────────────────────────

struct AwaitSettlementHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for AwaitSettlementHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let reference = ctx
            .prior_result("SubmitToClearing")
            .and_then(|value| value.get("clearing_reference"))
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invariant("no clearing reference to settle"))?;
        let result = self
            .0
            .settlement
            .wait_for(reference, self.0.settlement_wait)
            .await?;
        serde_json::to_value(&result)
            .map_err(|e| CoreError::invariant(format!("unserializable settlement result: {e}")))
    }

    async fn compensate(&self, _ctx: &StepContext, original: &Value) -> Result<(), CoreError> {
        let reference = original
            .get("clearing_reference")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invariant("clearing reference missing from step result"))?;
        self.0.settlement.cancel(reference).await
    }
}

// ── 7. CompleteTransaction ───────────────────────────────────────────

struct CompleteTransactionHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for CompleteTransactionHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let payment_id = payment_id_of(ctx)?;
        let mut transaction =
            load_transaction(&self.0.transactions, &payment_id, &ctx.tenant).await?;
        if transaction.status != payrail_ledger::TransactionStatus::Completed {
            transaction.complete().map_err(CoreError::from)?;
            self.0
                .transactions
                .save(&mut transaction)
                .await
                .map_err(CoreError::from)?;
        }

        let mut payment = load_payment(&self.0.payments, &payment_id, &ctx.tenant).await?;
        if payment.status != payrail_domain::PaymentStatus::Completed {
            payment.complete().map_err(CoreError::from)?;
            self.0
                .payments
                .save(&mut payment, None)
                .await
                .map_err(CoreError::from)?;
        }
        Ok(json!({ "transaction_id": transaction.transaction_id }))
    }

    /// Post-complete compensation is a last resort: a settled transaction
    /// cannot be un-completed, so the attempt surfaces as a compensation
    /// failure and the saga ends FAILED rather than pretending to undo it.
    async fn compensate(&self, ctx: &StepContext, _original: &Value) -> Result<(), CoreError> {
        let payment_id = payment_id_of(ctx)?;
        let mut transaction =
            load_transaction(&self.0.transactions, &payment_id, &ctx.tenant).await?;
        transaction
            .fail("post-complete-compensate")
            .map_err(CoreError::from)?;
        self.0
            .transactions
            .save(&mut transaction)
            .await
            .map_err(CoreError::from)
    }
}

// ── 8. Notify ────────────────────────────────────────────────────────

struct NotifyHandler(Arc<PaymentFlowDeps>);

#[async_trait]
impl StepHandler for NotifyHandler {
    /// Delivery is best-effort: a failed notification is logged and never
    /// unwinds a settled payment.
    async fn execute(&self, ctx: &StepContext) -> Result<Value, CoreError> {
        let payment_id = payment_id_of(ctx)?;
        match self
            .0
            .notifications
            .send(&payment_id, "PaymentCompleted")
            .await
        {
            Ok(()) => Ok(json!({ "delivered": true })),
            Err(err) => {
                warn!(payment_id = %payment_id, error = %err, "completion notification failed");
                Ok(json!({ "delivered": false, "error": err.to_string() }))
            }
        }
    }
}
