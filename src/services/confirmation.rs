//! Payment confirmation service.
//!
//! Confirms a payment AFTER USSD completion. The confirming caller (an
//! operator matching an SMS receipt, or the reconciliation worker relaying a
//! provider verdict) submits the reference plus the payer/amount/provider it
//! observed; those claims are cross-checked against the stored record and its
//! HMAC signature before any state moves. Safe to invoke repeatedly.

use crate::config::BillingConfig;
use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError};
use crate::payments::signature;
use crate::payments::types::{validate_msisdn, PaymentRecord, PaymentStatus, ProviderName};
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// An operator's (or the reconciliation worker's) claim about a settled
/// payment.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub reference: String,
    pub payer_phone: String,
    pub provider: ProviderName,
    pub amount: BigDecimal,
    pub provider_tx_id: Option<String>,
}

pub struct ConfirmationService {
    payments: Arc<dyn PaymentStore>,
    billing: BillingConfig,
}

impl ConfirmationService {
    pub fn new(payments: Arc<dyn PaymentStore>, billing: BillingConfig) -> Self {
        Self { payments, billing }
    }

    /// PENDING/AWAITING_VERIFICATION -> SUCCESS after the cross-check passes.
    /// Re-confirming an already-successful record with matching details is a
    /// no-op; a mismatch never changes status.
    pub async fn confirm(&self, request: ConfirmationRequest) -> Result<PaymentRecord, AppError> {
        validate_msisdn(&request.payer_phone)?;
        if request.amount < BigDecimal::from(0) {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidAmount {
                    amount: request.amount.to_string(),
                    reason: "must not be negative".to_string(),
                },
            )));
        }

        let record = self
            .payments
            .get_by_reference(&request.reference)
            .await?
            .ok_or_else(|| self.not_found(&request.reference))?;

        // Integrity gate before any transition attempt.
        cross_check(&record, &request, &self.billing.signature_secret)?;

        let status = self.state_of(&record)?;
        match status {
            PaymentStatus::Success => {
                info!(
                    reference = %record.reference,
                    "payment already confirmed, re-confirmation is a no-op"
                );
                Ok(record)
            }
            status if status.is_terminal() => Err(self.invalid_transition(
                &record.reference,
                status,
                PaymentStatus::Success,
            )),
            _ => {
                let confirmed = self
                    .payments
                    .confirm(
                        &request.reference,
                        request.provider_tx_id.as_deref(),
                        Utc::now(),
                    )
                    .await?;

                match confirmed {
                    Some(updated) => {
                        info!(
                            reference = %updated.reference,
                            provider = %updated.provider,
                            amount = %updated.amount,
                            "payment confirmed"
                        );
                        Ok(updated)
                    }
                    // Guard missed: something else resolved the row first.
                    None => {
                        let current = self
                            .payments
                            .get_by_reference(&request.reference)
                            .await?
                            .ok_or_else(|| self.not_found(&request.reference))?;
                        match self.state_of(&current)? {
                            PaymentStatus::Success => Ok(current),
                            other => Err(self.invalid_transition(
                                &current.reference,
                                other,
                                PaymentStatus::Success,
                            )),
                        }
                    }
                }
            }
        }
    }

    /// PENDING -> AWAITING_VERIFICATION: the payer claims to have dialed and
    /// supplies the transaction id from the provider SMS.
    pub async fn mark_awaiting(
        &self,
        reference: &str,
        provider_tx_id: &str,
    ) -> Result<PaymentRecord, AppError> {
        if provider_tx_id.trim().is_empty() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: "provider_tx_id".to_string(),
                },
            )));
        }

        if let Some(updated) = self
            .payments
            .mark_awaiting_verification(reference, provider_tx_id)
            .await?
        {
            info!(
                reference = %updated.reference,
                provider_tx_id = %provider_tx_id,
                "payment flagged as awaiting verification"
            );
            return Ok(updated);
        }

        let current = self
            .payments
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| self.not_found(reference))?;
        match self.state_of(&current)? {
            // Already flagged; repeating the claim is fine.
            PaymentStatus::AwaitingVerification => Ok(current),
            other => Err(self.invalid_transition(
                reference,
                other,
                PaymentStatus::AwaitingVerification,
            )),
        }
    }

    /// PENDING/AWAITING_VERIFICATION -> CANCELLED (admin or payer withdrawal
    /// before settlement). Idempotent for already-cancelled rows.
    pub async fn cancel(&self, reference: &str) -> Result<PaymentRecord, AppError> {
        if let Some(updated) = self.payments.cancel(reference).await? {
            info!(reference = %updated.reference, "payment cancelled");
            return Ok(updated);
        }

        let current = self
            .payments
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| self.not_found(reference))?;
        match self.state_of(&current)? {
            PaymentStatus::Cancelled => Ok(current),
            other => Err(self.invalid_transition(reference, other, PaymentStatus::Cancelled)),
        }
    }

    /// SUCCESS -> REFUNDED. Idempotent for already-refunded rows.
    pub async fn refund(&self, reference: &str) -> Result<PaymentRecord, AppError> {
        if let Some(updated) = self.payments.refund(reference).await? {
            info!(reference = %updated.reference, "payment refunded");
            return Ok(updated);
        }

        let current = self
            .payments
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| self.not_found(reference))?;
        match self.state_of(&current)? {
            PaymentStatus::Refunded => Ok(current),
            other => Err(self.invalid_transition(reference, other, PaymentStatus::Refunded)),
        }
    }

    fn state_of(&self, record: &PaymentRecord) -> Result<PaymentStatus, AppError> {
        record.state().ok_or_else(|| {
            AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::Database {
                    message: format!(
                        "payment '{}' carries unknown status '{}'",
                        record.reference, record.status
                    ),
                    is_retryable: false,
                },
            ))
        })
    }

    fn not_found(&self, reference: &str) -> AppError {
        AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            reference: reference.to_string(),
        }))
    }

    fn invalid_transition(
        &self,
        reference: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> AppError {
        AppError::new(AppErrorKind::Domain(DomainError::InvalidStateTransition {
            reference: reference.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }))
    }
}

/// Compare an operator's claims against the stored record and its signature.
/// Any divergence rejects the confirmation without touching the row.
fn cross_check(
    record: &PaymentRecord,
    request: &ConfirmationRequest,
    secret: &str,
) -> Result<(), AppError> {
    let reason = if record.user_phone != request.payer_phone {
        Some("payer phone does not match the stored record")
    } else if record.amount != request.amount {
        Some("amount does not match the stored record")
    } else if record.provider != request.provider.as_str() {
        Some("provider does not match the stored record")
    } else if !signature::verify(
        secret,
        &record.reference,
        &request.amount,
        &request.payer_phone,
        &record.signature,
    ) {
        Some("signature verification failed")
    } else {
        None
    };

    match reason {
        None => Ok(()),
        Some(reason) => {
            warn!(
                reference = %record.reference,
                claimed_phone = %request.payer_phone,
                claimed_amount = %request.amount,
                claimed_provider = %request.provider,
                reason,
                "payment confirmation rejected"
            );
            Err(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentMismatch {
                    reference: record.reference.clone(),
                    reason: reason.to_string(),
                },
            )))
        }
    }
}
