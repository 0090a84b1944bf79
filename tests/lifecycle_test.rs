//! Payment lifecycle scenarios: admin confirmation with the signature
//! cross-check, the expiry sweep, cancellation/refund, and the automated
//! reconciliation worker.

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{harness, xaf, Harness};
use std::sync::Arc;
use Carelink_backend::database::repository::PaymentStore;
use Carelink_backend::error::{AppError, AppErrorKind, DomainError};
use Carelink_backend::payments::provider::{ProviderStatusSource, ProviderVerdict};
use Carelink_backend::payments::types::{PaymentStatus, ProviderName, ServiceCategory};
use Carelink_backend::services::confirmation::{ConfirmationRequest, ConfirmationService};
use Carelink_backend::services::orchestrator::{OrchestrationOutcome, ServiceRequest};
use Carelink_backend::workers::payment_expiry::{ExpirySweeperConfig, ExpirySweeperWorker};
use Carelink_backend::workers::reconciliation::{ReconciliationConfig, ReconciliationWorker};

const PHONE: &str = "677123456";

/// Exhaust the doctor quota and create one PENDING payment; returns its
/// reference.
async fn create_paid_payment(h: &Harness, key: &str) -> String {
    h.usage.set_used("patient-1", "doctor", 5);
    let request = ServiceRequest {
        caller_id: "patient-1".to_string(),
        recipient_id: "doctor-9".to_string(),
        caller_phone: PHONE.to_string(),
        category: ServiceCategory::Doctor,
        provider: None,
        idempotency_key: Some(key.to_string()),
    };
    match h.orchestrator.handle(request).await.unwrap().outcome {
        OrchestrationOutcome::PaymentRequired { reference, .. } => reference,
        other => panic!("expected PaymentRequired, got {:?}", other),
    }
}

fn confirm_request(reference: &str, amount: i64, phone: &str) -> ConfirmationRequest {
    ConfirmationRequest {
        reference: reference.to_string(),
        payer_phone: phone.to_string(),
        provider: ProviderName::Mtn,
        amount: xaf(amount),
        provider_tx_id: Some("MP240101.1234.A56789".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Admin confirmation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn matching_confirmation_settles_payment() {
    let h = harness();
    let reference = create_paid_payment(&h, "key-1").await;

    let record = h
        .confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap();

    assert_eq!(record.state(), Some(PaymentStatus::Success));
    assert!(record.confirmed_at.is_some());
    assert_eq!(record.provider_tx_id.as_deref(), Some("MP240101.1234.A56789"));

    // A second identical confirmation is a no-op returning SUCCESS.
    let again = h
        .confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap();
    assert_eq!(again.state(), Some(PaymentStatus::Success));
}

#[tokio::test]
async fn tampered_amount_is_rejected_without_status_change() {
    let h = harness();
    let reference = create_paid_payment(&h, "key-1").await;

    let err = h
        .confirmation
        .confirm(confirm_request(&reference, 600, PHONE))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::PaymentMismatch { .. })
    ));
    assert_eq!(h.payments.status_of(&reference).as_deref(), Some("PENDING"));

    // A corrected attempt still goes through.
    let record = h
        .confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap();
    assert_eq!(record.state(), Some(PaymentStatus::Success));
}

#[tokio::test]
async fn wrong_payer_phone_is_rejected() {
    let h = harness();
    let reference = create_paid_payment(&h, "key-1").await;

    let err = h
        .confirmation
        .confirm(confirm_request(&reference, 300, "650111222"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::PaymentMismatch { .. })
    ));
    assert_eq!(h.payments.status_of(&reference).as_deref(), Some("PENDING"));
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let h = harness();

    let err = h
        .confirmation
        .confirm(confirm_request("doctor-missing", 300, PHONE))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::PaymentNotFound { .. })
    ));
}

#[tokio::test]
async fn awaiting_verification_then_confirm() {
    let h = harness();
    let reference = create_paid_payment(&h, "key-1").await;

    let record = h
        .confirmation
        .mark_awaiting(&reference, "MP240101.1234.A56789")
        .await
        .unwrap();
    assert_eq!(record.state(), Some(PaymentStatus::AwaitingVerification));

    // Repeating the claim is idempotent.
    let again = h
        .confirmation
        .mark_awaiting(&reference, "MP240101.1234.A56789")
        .await
        .unwrap();
    assert_eq!(again.state(), Some(PaymentStatus::AwaitingVerification));

    let record = h
        .confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap();
    assert_eq!(record.state(), Some(PaymentStatus::Success));
}

#[tokio::test]
async fn cancel_and_refund_paths() {
    let h = harness();

    // Cancel a pending payment; repeat is a no-op; confirm is then refused.
    let reference = create_paid_payment(&h, "key-1").await;
    let record = h.confirmation.cancel(&reference).await.unwrap();
    assert_eq!(record.state(), Some(PaymentStatus::Cancelled));
    let again = h.confirmation.cancel(&reference).await.unwrap();
    assert_eq!(again.state(), Some(PaymentStatus::Cancelled));
    let err = h
        .confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::InvalidStateTransition { .. })
    ));

    // Refund a settled payment.
    let reference = create_paid_payment(&h, "key-2").await;
    h.confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap();
    let record = h.confirmation.refund(&reference).await.unwrap();
    assert_eq!(record.state(), Some(PaymentStatus::Refunded));

    // A refund of an unsettled payment is refused.
    let reference = create_paid_payment(&h, "key-3").await;
    let err = h.confirmation.refund(&reference).await.unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::InvalidStateTransition { .. })
    ));
}

// ---------------------------------------------------------------------------
// Expiry sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overdue_pending_payment_is_swept_exactly_once() {
    let h = harness();
    let reference = create_paid_payment(&h, "key-1").await;
    h.payments.backdate(&reference, Utc::now() - Duration::seconds(1));

    let sweeper = ExpirySweeperWorker::new(h.payments.clone(), ExpirySweeperConfig::default());

    sweeper.run_cycle().await.unwrap();
    assert_eq!(h.payments.status_of(&reference).as_deref(), Some("FAILED"));

    // Second tick finds nothing: no double-processing.
    let swept_again = h.payments.expire_due(Utc::now()).await.unwrap();
    assert_eq!(swept_again, 0);

    // A late confirmation attempt cannot resurrect the record.
    let err = h
        .confirmation
        .confirm(confirm_request(&reference, 300, PHONE))
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn sweep_leaves_fresh_and_awaiting_rows_alone() {
    let h = harness();

    let fresh = create_paid_payment(&h, "key-1").await;

    h.usage.set_used("patient-2", "doctor", 5);
    let request = ServiceRequest {
        caller_id: "patient-2".to_string(),
        recipient_id: "doctor-9".to_string(),
        caller_phone: "650111222".to_string(),
        category: ServiceCategory::Doctor,
        provider: None,
        idempotency_key: Some("key-2".to_string()),
    };
    let awaiting = match h.orchestrator.handle(request).await.unwrap().outcome {
        OrchestrationOutcome::PaymentRequired { reference, .. } => reference,
        other => panic!("expected PaymentRequired, got {:?}", other),
    };
    h.confirmation
        .mark_awaiting(&awaiting, "MP000")
        .await
        .unwrap();
    // Even an overdue awaiting-verification row waits for a human verdict.
    h.payments.backdate(&awaiting, Utc::now() - Duration::minutes(30));

    let expired = h.payments.expire_due(Utc::now()).await.unwrap();
    assert_eq!(expired, 0);
    assert_eq!(h.payments.status_of(&fresh).as_deref(), Some("PENDING"));
    assert_eq!(
        h.payments.status_of(&awaiting).as_deref(),
        Some("AWAITING_VERIFICATION")
    );
}

// ---------------------------------------------------------------------------
// Automated reconciliation
// ---------------------------------------------------------------------------

/// Scripted provider: the verdict is keyed off the provider transaction id.
struct ScriptedSource;

#[async_trait]
impl ProviderStatusSource for ScriptedSource {
    async fn fetch_status(
        &self,
        _provider: ProviderName,
        provider_tx_id: &str,
    ) -> Result<ProviderVerdict, AppError> {
        Ok(match provider_tx_id {
            "tx-settled" => ProviderVerdict::Succeeded {
                amount: Some(xaf(300)),
                payer_phone: Some(PHONE.to_string()),
            },
            "tx-settled-wrong-amount" => ProviderVerdict::Succeeded {
                amount: Some(xaf(999)),
                payer_phone: Some(PHONE.to_string()),
            },
            "tx-declined" => ProviderVerdict::Failed {
                reason: Some("PAYER_LIMIT_REACHED".to_string()),
            },
            _ => ProviderVerdict::StillPending,
        })
    }
}

#[tokio::test]
async fn reconciliation_applies_provider_verdicts() {
    let h = harness();

    let mut references = Vec::new();
    for (i, tx_id) in [
        "tx-settled",
        "tx-settled-wrong-amount",
        "tx-declined",
        "tx-in-flight",
    ]
    .iter()
    .enumerate()
    {
        let user = format!("patient-{}", i);
        h.usage.set_used(&user, "doctor", 5);
        let request = ServiceRequest {
            caller_id: user,
            recipient_id: "doctor-9".to_string(),
            caller_phone: PHONE.to_string(),
            category: ServiceCategory::Doctor,
            provider: None,
            idempotency_key: Some(format!("key-{}", i)),
        };
        let reference = match h.orchestrator.handle(request).await.unwrap().outcome {
            OrchestrationOutcome::PaymentRequired { reference, .. } => reference,
            other => panic!("expected PaymentRequired, got {:?}", other),
        };
        h.confirmation.mark_awaiting(&reference, tx_id).await.unwrap();
        references.push(reference);
    }

    let confirmer = Arc::new(ConfirmationService::new(
        h.payments.clone(),
        h.billing.clone(),
    ));
    let worker = ReconciliationWorker::new(
        h.payments.clone(),
        Arc::new(ScriptedSource),
        confirmer,
        ReconciliationConfig::default(),
    );

    worker.run_cycle().await.unwrap();

    // Settled with matching details -> SUCCESS.
    assert_eq!(
        h.payments.status_of(&references[0]).as_deref(),
        Some("SUCCESS")
    );
    // Settled but the provider's amount disagrees -> cross-check refuses it.
    assert_eq!(
        h.payments.status_of(&references[1]).as_deref(),
        Some("AWAITING_VERIFICATION")
    );
    // Declined while awaiting verification -> CANCELLED (no failed edge).
    assert_eq!(
        h.payments.status_of(&references[2]).as_deref(),
        Some("CANCELLED")
    );
    // Still in flight -> untouched.
    assert_eq!(
        h.payments.status_of(&references[3]).as_deref(),
        Some("AWAITING_VERIFICATION")
    );

    // A second cycle changes nothing further.
    worker.run_cycle().await.unwrap();
    assert_eq!(
        h.payments.status_of(&references[0]).as_deref(),
        Some("SUCCESS")
    );
    assert_eq!(
        h.payments.status_of(&references[2]).as_deref(),
        Some("CANCELLED")
    );
}
