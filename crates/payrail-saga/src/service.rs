//! The inbound payment service: initiate, query, cancel.

use crate::error::SagaError;
use crate::instance::{SagaInstance, SagaStatus};
use crate::orchestrator::SagaOrchestrator;
use crate::ports::{PaymentRepository, SagaRepository};
use crate::template::TemplateRegistry;
use crate::throttle::{TenantGate, ThrottleConfig};
use payrail_domain::{
    Payment, PaymentId, PaymentRequest, PaymentStatus, StoreError, TenantContext,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// What `get_payment` surfaces to callers: status plus the saga's failure
/// reason, never a low-level error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    sagas: Arc<dyn SagaRepository>,
    orchestrator: Arc<SagaOrchestrator>,
    templates: TemplateRegistry,
    gate: TenantGate,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        sagas: Arc<dyn SagaRepository>,
        orchestrator: Arc<SagaOrchestrator>,
        throttle: ThrottleConfig,
    ) -> Self {
        Self {
            payments,
            sagas,
            orchestrator,
            templates: TemplateRegistry::builtin(),
            gate: TenantGate::new(throttle),
        }
    }

    /// Initiate a payment and drive its saga to a terminal status.
    ///
    /// Idempotent on the request's `idempotency_key`: a repeated call
    /// returns the original payment id and starts no new saga.
    pub async fn initiate_payment(&self, request: PaymentRequest) -> Result<PaymentId, SagaError> {
        if let Some(existing) = self
            .payments
            .find_by_idempotency_key(&request.idempotency_key, &request.tenant)
            .await?
        {
            info!(payment_id = %existing, "idempotent replay of payment initiation");
            return Ok(existing);
        }

        let _permit = self.gate.acquire(&request.tenant).await?;

        let mut payment = Payment::initiate(&request)?;
        let payment_id = payment.payment_id.clone();
        match self
            .payments
            .save(&mut payment, Some(&request.idempotency_key))
            .await
        {
            Ok(()) => {}
            // Lost a race on the key: hand back the winner's payment id.
            Err(StoreError::DuplicateIdempotencyKey { payment_id }) => {
                return Ok(PaymentId::new(payment_id)?);
            }
            Err(err) => return Err(err.into()),
        }

        let template = self
            .templates
            .get("PAYMENT_PROCESSING")
            .ok_or_else(|| SagaError::TemplateNotFound("PAYMENT_PROCESSING".to_string()))?;
        let payload = serde_json::to_value(&request).map_err(|e| {
            SagaError::InvalidTransition(format!("unserializable payment request: {e}"))
        })?;
        let mut saga = SagaInstance::from_template(
            template,
            request.tenant.clone(),
            payment_id.as_str(),
            Uuid::new_v4().to_string(),
            payload,
        );
        let saga_id = saga.saga_id.clone();
        self.sagas.save(&mut saga).await?;
        info!(payment_id = %payment_id, saga_id = %saga_id, "payment saga launched");

        let status = self.orchestrator.run(&saga_id, &request.tenant).await?;
        self.finalize_payment(&payment_id, &request.tenant, status)
            .await?;
        Ok(payment_id)
    }

    pub async fn get_payment(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
    ) -> Result<PaymentStatusView, SagaError> {
        let payment = self
            .payments
            .load(payment_id, tenant)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(payment_id.to_string()))?;
        Ok(PaymentStatusView {
            payment_id: payment.payment_id.clone(),
            status: payment.status,
            reason: payment.failure_reason.clone(),
        })
    }

    /// Request cancellation. Valid only before the saga completes; the
    /// orchestrator observes the request at the next step boundary.
    pub async fn cancel_payment(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
        reason: impl Into<String>,
    ) -> Result<(), SagaError> {
        let payment = self
            .payments
            .load(payment_id, tenant)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(payment_id.to_string()))?;
        if payment.status == PaymentStatus::Completed {
            return Err(SagaError::CancellationRejected(
                "payment already completed".to_string(),
            ));
        }

        let mut saga = self
            .sagas
            .find_by_business_key(payment_id.as_str(), tenant)
            .await?
            .ok_or_else(|| SagaError::SagaNotFound(payment_id.to_string()))?;
        saga.request_cancel(reason)?;
        self.sagas.save(&mut saga).await?;
        Ok(())
    }

    /// Surface a compensated or failed saga as a FAILED payment, unless
    /// routing already parked it as HELD.
    async fn finalize_payment(
        &self,
        payment_id: &PaymentId,
        tenant: &TenantContext,
        status: SagaStatus,
    ) -> Result<(), SagaError> {
        if !matches!(status, SagaStatus::Compensated | SagaStatus::Failed) {
            return Ok(());
        }
        let mut payment = self
            .payments
            .load(payment_id, tenant)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(payment_id.to_string()))?;
        if payment.status.is_terminal() {
            return Ok(());
        }
        let reason = self
            .sagas
            .find_by_business_key(payment_id.as_str(), tenant)
            .await?
            .and_then(|saga| saga.failure_reason)
            .unwrap_or_else(|| "payment processing failed".to_string());
        payment.fail(reason)?;
        self.payments.save(&mut payment, None).await?;
        Ok(())
    }
}
