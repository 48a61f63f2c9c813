//! Payrail saga orchestrator.
//!
//! The top-level coordinator of the payments core. For each payment it
//! instantiates a saga from a template, drives forward steps through ports
//! (validation, funds reservation, routing, ledger posting, clearing,
//! settlement, notification), records every outcome, and on failure walks
//! completed steps in reverse invoking their compensations. Saga state is
//! persisted after every change; recovery replays idempotent steps.

#![deny(unsafe_code)]

pub mod error;
pub mod handler;
pub mod instance;
pub mod orchestrator;
pub mod payment_flow;
pub mod ports;
pub mod retry;
pub mod service;
pub mod template;
pub mod throttle;

pub use error::SagaError;
pub use handler::{StepContext, StepHandler, StepRegistry};
pub use instance::{SagaEvent, SagaInstance, SagaStatus, SagaStep, StepStatus};
pub use orchestrator::{SagaConfig, SagaOrchestrator};
pub use payment_flow::{payment_step_registry, PaymentFlowDeps};
pub use ports::{
    AccountAdapter, ClearingAdapter, NotificationPort, PaymentRepository, Reservation,
    SagaRepository, SettlementPort, SettlementResult,
};
pub use retry::RetryPolicy;
pub use service::{PaymentService, PaymentStatusView};
pub use template::{actions, SagaTemplate, StepDefinition, TemplateRegistry};
pub use throttle::{InFlightPermit, TenantGate, ThrottleConfig};
