//! End-to-end payment scenarios over the in-memory adapters.

use payrail_adapters::{
    CollectingPublisher, MemoryAccountAdapter, MemoryClearingAdapter, MemoryNotificationPort,
    MemoryOutbox, MemoryPaymentRepository, MemoryRoutingRules, MemoryRuleContext,
    MemorySagaRepository, MemorySettlementPort, MemoryTransactionRepository,
    OutboxRelay, StaticValidationRules,
};
use payrail_domain::{
    AccountNumber, ClearingSystem, CoreError, Currency, DomainEvent, IdempotencyKey, Money,
    PaymentRequest, PaymentStatus, PaymentType, TenantContext,
};
use payrail_ledger::{TransactionRepository, TransactionStatus};
use payrail_routing::{
    ConditionOperator, RoutingAction, RoutingCondition, RoutingConfig, RoutingEngine, RoutingRule,
};
use payrail_saga::{
    payment_step_registry, PaymentFlowDeps, PaymentRepository, PaymentService, RetryPolicy,
    SagaConfig, SagaError, SagaInstance, SagaOrchestrator, SagaRepository, SagaStatus,
    SagaTemplate, StepStatus, ThrottleConfig,
};
use payrail_validation::{ValidationConfig, ValidationEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn zar(amount: Decimal) -> Money {
    Money::new(amount, Currency::new("ZAR").unwrap())
}

fn tenant() -> TenantContext {
    TenantContext::new("T1").unwrap().with_business_unit("B1")
}

fn source() -> AccountNumber {
    AccountNumber::new("12345678901").unwrap()
}

fn destination() -> AccountNumber {
    AccountNumber::new("98765432101").unwrap()
}

fn eft_request(key: &str, amount: Decimal, reference: &str) -> PaymentRequest {
    PaymentRequest::new(
        IdempotencyKey::new(key).unwrap(),
        tenant(),
        source(),
        destination(),
        zar(amount),
        reference,
        PaymentType::Eft,
        "api-user",
    )
}

fn bankserv_rule() -> RoutingRule {
    RoutingRule::new("rule-eft", "eft-default", "T1")
        .with_priority(10)
        .with_condition(RoutingCondition::new(
            "paymentType",
            ConditionOperator::Equals,
            "EFT",
        ))
        .with_action(RoutingAction::route_to(
            ClearingSystem::new("BANKSERV_EFT").unwrap(),
        ))
}

struct Harness {
    service: Arc<PaymentService>,
    orchestrator: Arc<SagaOrchestrator>,
    payments: Arc<MemoryPaymentRepository>,
    sagas: Arc<MemorySagaRepository>,
    transactions: Arc<MemoryTransactionRepository>,
    accounts: Arc<MemoryAccountAdapter>,
    clearing: Arc<MemoryClearingAdapter>,
    notifications: Arc<MemoryNotificationPort>,
    publisher: Arc<CollectingPublisher>,
    relay: OutboxRelay,
}

fn build_harness(routing_rules: Vec<RoutingRule>, throttle: ThrottleConfig) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_test_writer()
        .try_init();

    let outbox = Arc::new(MemoryOutbox::new());
    let payments = Arc::new(MemoryPaymentRepository::new(outbox.clone()));
    let sagas = Arc::new(MemorySagaRepository::new(outbox.clone()));
    let transactions = Arc::new(MemoryTransactionRepository::new(outbox.clone()));
    let accounts = Arc::new(
        MemoryAccountAdapter::new()
            .with_account(&source(), zar(dec!(1000000)))
            .with_account(&destination(), zar(dec!(0))),
    );
    let clearing = Arc::new(MemoryClearingAdapter::new());
    let settlement = Arc::new(MemorySettlementPort::new());
    let notifications = Arc::new(MemoryNotificationPort::new());
    let publisher = Arc::new(CollectingPublisher::new());

    let validation_config = ValidationConfig::default();
    let validation = Arc::new(ValidationEngine::new(
        Arc::new(StaticValidationRules::standard(&validation_config)),
        Arc::new(MemoryRuleContext::new()),
        validation_config,
    ));
    let routing = Arc::new(RoutingEngine::new(
        Arc::new(MemoryRoutingRules::with_rules(routing_rules)),
        RoutingConfig::default(),
    ));

    let deps = Arc::new(PaymentFlowDeps {
        validation,
        routing,
        payments: payments.clone(),
        transactions: transactions.clone(),
        accounts: accounts.clone(),
        clearing: clearing.clone(),
        settlement,
        notifications: notifications.clone(),
        settlement_wait: Duration::from_secs(5),
    });
    let orchestrator = Arc::new(SagaOrchestrator::new(
        sagas.clone(),
        payment_step_registry(deps),
        SagaConfig {
            step_timeout: Duration::from_secs(5),
            retry: RetryPolicy::immediate(3),
        },
    ));
    let service = Arc::new(PaymentService::new(
        payments.clone(),
        sagas.clone(),
        orchestrator.clone(),
        throttle,
    ));
    let relay = OutboxRelay::new(outbox, publisher.clone());

    Harness {
        service,
        orchestrator,
        payments,
        sagas,
        transactions,
        accounts,
        clearing,
        notifications,
        publisher,
        relay,
    }
}

async fn saga_for(harness: &Harness, payment_id: &payrail_domain::PaymentId) -> SagaInstance {
    harness
        .sagas
        .find_by_business_key(payment_id.as_str(), &tenant())
        .await
        .unwrap()
        .expect("saga exists for payment")
}

#[tokio::test]
async fn happy_path_eft_payment() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Completed);

    // Exactly one transaction: debit=source, credit=dest, balanced pair.
    let transactions = harness.transactions.all();
    assert_eq!(transactions.len(), 1);
    let txn = &transactions[0];
    assert_eq!(txn.status, TransactionStatus::Completed);
    assert_eq!(txn.debit_account, source());
    assert_eq!(txn.credit_account, destination());
    assert_eq!(txn.amount, zar(dec!(1000.00)));
    assert_eq!(txn.clearing_system.as_ref().unwrap().as_str(), "BANKSERV_EFT");
    assert!(txn.verify_double_entry().is_ok());

    // Saga terminal COMPLETED means every step COMPLETED.
    let saga = saga_for(&harness, &payment_id).await;
    assert_eq!(saga.status, SagaStatus::Completed);
    assert!(saga
        .steps
        .iter()
        .all(|step| step.status == StepStatus::Completed));

    // PaymentCompleted published with the responded payment id.
    harness.relay.drain().await.unwrap();
    let completed: Vec<_> = harness
        .publisher
        .events()
        .into_iter()
        .filter(|event| matches!(event, DomainEvent::PaymentCompleted { .. }))
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].header().aggregate_id, payment_id.as_str());

    assert_eq!(
        harness.notifications.sent(),
        vec![(payment_id.to_string(), "PaymentCompleted".to_string())]
    );
}

#[tokio::test]
async fn idempotent_replay_returns_original_payment() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());

    let first = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();
    let second = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.sagas.count(), 1);
    assert_eq!(harness.payments.count(), 1);

    harness.relay.drain().await.unwrap();
    assert_eq!(harness.publisher.count_of("PaymentInitiated"), 1);
}

#[tokio::test]
async fn empty_reference_is_rejected_by_validation() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), ""))
        .await
        .unwrap();

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Failed);
    assert!(view
        .reason
        .as_deref()
        .unwrap()
        .contains("Payment reference is required"));

    // No funds were reserved, so the compensation walk was empty.
    let saga = saga_for(&harness, &payment_id).await;
    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.compensation_failures, 0);
    assert_eq!(harness.accounts.reservation_count(), 0);
    assert_eq!(harness.accounts.balance_of(&source()).unwrap(), zar(dec!(1000000)));
    assert_eq!(harness.transactions.count(), 0);
}

#[tokio::test]
async fn clearing_rejection_compensates_in_reverse() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());
    harness
        .clearing
        .fail_next(CoreError::permanent("authoritative clearing NACK"));

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let saga = saga_for(&harness, &payment_id).await;
    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.compensation_failures, 0);

    // Every previously-completed step is COMPENSATED.
    for name in ["Validate", "ReserveFunds", "DetermineRoute", "CreateTransaction"] {
        assert_eq!(
            saga.step_by_name(name).unwrap().status,
            StepStatus::Compensated,
            "step {name}"
        );
    }

    // Transaction failed by compensation, reserved funds released.
    let txn = &harness.transactions.all()[0];
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_eq!(txn.failure_reason.as_deref(), Some("compensation"));
    assert_eq!(
        harness.accounts.balance_of(&source()).unwrap(),
        zar(dec!(1000000))
    );
    // The submission was never acknowledged, so nothing to reverse.
    assert!(harness.clearing.reversals().is_empty());

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Failed);

    harness.relay.drain().await.unwrap();
    assert_eq!(harness.publisher.count_of("TransactionFailed"), 1);
    assert_eq!(harness.publisher.count_of("SagaCompensated"), 1);
    assert_eq!(harness.publisher.count_of("SagaStepCompensated"), 4);
}

#[tokio::test]
async fn transient_clearing_errors_are_retried_with_same_pair() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());
    harness
        .clearing
        .fail_next(CoreError::transient("connection reset"));
    harness
        .clearing
        .fail_next(CoreError::transient("connection reset"));

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Completed);

    // Exactly three submissions, all carrying the same (saga_id, step_id).
    let calls = harness.clearing.submit_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn fallback_routing_when_no_rule_matches() {
    let harness = build_harness(vec![], ThrottleConfig::default());

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Completed);

    let txn = &harness.transactions.all()[0];
    assert_eq!(
        txn.clearing_system.as_ref().unwrap().as_str(),
        "DEFAULT_CLEARING"
    );

    let saga = saga_for(&harness, &payment_id).await;
    let route_result = saga
        .step_by_name("DetermineRoute")
        .unwrap()
        .result
        .clone()
        .unwrap();
    assert_eq!(route_result["fallback"], true);
    assert_eq!(route_result["decision_reason"], "No matching rule found");
}

#[tokio::test]
async fn over_limit_amount_fails_business_validation() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(200000), "large"))
        .await
        .unwrap();

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Failed);
    assert!(view
        .reason
        .as_deref()
        .unwrap()
        .contains("exceeds single payment limit"));

    let saga = saga_for(&harness, &payment_id).await;
    assert_eq!(saga.status, SagaStatus::Compensated);
    // No ledger entries were ever created.
    assert_eq!(harness.transactions.count(), 0);
}

#[tokio::test]
async fn held_payment_surfaces_as_held() {
    let hold_rule = RoutingRule::new("rule-hold", "manual-review", "T1")
        .with_priority(1)
        .with_action(RoutingAction::hold("Manual review required"));
    let harness = build_harness(vec![hold_rule], ThrottleConfig::default());

    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let view = harness
        .service
        .get_payment(&payment_id, &tenant())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Held);
    assert_eq!(view.reason.as_deref(), Some("Manual review required"));

    // Funds reserved before the hold were released by compensation.
    let saga = saga_for(&harness, &payment_id).await;
    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(
        harness.accounts.balance_of(&source()).unwrap(),
        zar(dec!(1000000))
    );
}

#[tokio::test]
async fn cancel_is_rejected_after_completion() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());
    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let result = harness
        .service
        .cancel_payment(&payment_id, &tenant(), "changed my mind")
        .await;
    assert!(matches!(result, Err(SagaError::CancellationRejected(_))));
}

#[tokio::test]
async fn queries_never_cross_tenants() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());
    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    let other = TenantContext::new("T2").unwrap();
    assert!(matches!(
        harness.service.get_payment(&payment_id, &other).await,
        Err(SagaError::PaymentNotFound(_))
    ));
    assert!(harness
        .transactions
        .find_by_payment(&payment_id, &other)
        .await
        .unwrap()
        .is_none());
    assert!(harness
        .sagas
        .find_by_business_key(payment_id.as_str(), &other)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn aggregate_events_are_published_in_emission_order() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());
    let payment_id = harness
        .service
        .initiate_payment(eft_request("K-1", dec!(1000.00), "Invoice 42"))
        .await
        .unwrap();

    harness.relay.drain().await.unwrap();
    let payment_events: Vec<_> = harness
        .publisher
        .events()
        .into_iter()
        .filter(|event| event.header().aggregate_id == payment_id.as_str())
        .collect();
    let kinds: Vec<_> = payment_events.iter().map(|event| event.kind()).collect();
    assert_eq!(
        kinds,
        vec!["PaymentInitiated", "PaymentValidated", "PaymentCompleted"]
    );
    assert!(payment_events
        .windows(2)
        .all(|pair| pair[0].header().occurred_at <= pair[1].header().occurred_at));
}

#[tokio::test]
async fn saturated_tenant_gets_too_many_in_flight() {
    let harness = build_harness(
        vec![bankserv_rule()],
        ThrottleConfig {
            max_in_flight_per_tenant: 1,
            queue_depth: 0,
            max_queue_wait: Duration::from_millis(50),
        },
    );
    harness.clearing.delay_submissions(Duration::from_millis(200));

    let slow_service = harness.service.clone();
    let fast_service = harness.service.clone();
    let (first, second) = tokio::join!(
        slow_service.initiate_payment(eft_request("K-A", dec!(1000.00), "Invoice A")),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fast_service
                .initiate_payment(eft_request("K-B", dec!(1000.00), "Invoice B"))
                .await
        }
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(SagaError::TooManyInFlight(_))));
}

#[tokio::test]
async fn crash_recovery_resumes_persisted_saga() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());

    // Simulate a saga persisted by a crashed worker: payment and saga rows
    // exist, but no worker is driving them.
    let request = eft_request("K-crash", dec!(1000.00), "Invoice 42");
    let mut payment = payrail_domain::Payment::initiate(&request).unwrap();
    let payment_id = payment.payment_id.clone();
    harness
        .payments
        .save(&mut payment, Some(&request.idempotency_key))
        .await
        .unwrap();
    let template = SagaTemplate::payment_processing();
    let mut saga = SagaInstance::from_template(
        &template,
        tenant(),
        payment_id.as_str(),
        "corr-crash",
        serde_json::to_value(&request).unwrap(),
    );
    harness.sagas.save(&mut saga).await.unwrap();

    let resumed = harness
        .orchestrator
        .clone()
        .recover_in_flight()
        .await
        .unwrap();
    assert_eq!(resumed.len(), 1);

    for _ in 0..200 {
        let current = saga_for(&harness, &payment_id).await;
        if current.is_terminal() {
            assert_eq!(current.status, SagaStatus::Completed);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("recovered saga never reached a terminal status");
}

#[tokio::test]
async fn concurrent_saga_writers_see_one_conflict() {
    let harness = build_harness(vec![bankserv_rule()], ThrottleConfig::default());
    let template = SagaTemplate::payment_processing();
    let mut saga = SagaInstance::from_template(
        &template,
        tenant(),
        "pay-race",
        "corr-race",
        serde_json::json!({}),
    );
    harness.sagas.save(&mut saga).await.unwrap();

    let mut first = harness
        .sagas
        .load(&saga.saga_id, &tenant())
        .await
        .unwrap()
        .unwrap();
    let mut second = first.clone();

    assert!(harness.sagas.save(&mut first).await.is_ok());
    assert!(matches!(
        harness.sagas.save(&mut second).await,
        Err(payrail_domain::StoreError::VersionConflict { .. })
    ));
}
