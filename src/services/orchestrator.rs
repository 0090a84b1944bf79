//! Service Orchestrator
//!
//! The decision engine behind every service request: decides free-vs-paid,
//! drives the usage ledger and the payment store, and triggers room
//! provisioning. At-most-once behavior under retries comes from the payment
//! store's unique idempotency key, which this service checks before any
//! mutation and falls back to after losing a creation race.

use crate::config::BillingConfig;
use crate::database::repository::{PaymentStore, UsageLedger};
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use crate::payments::signature;
use crate::payments::types::{
    validate_msisdn, NewPayment, PaymentRecord, PaymentStatus, ProviderName, ServiceCategory,
};
use crate::payments::ussd;
use crate::rooms::{RoomKind, RoomProvisioner};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// `remaining_free_uses` sentinel for a replayed (duplicate) request.
pub const REMAINING_DUPLICATE: i64 = -2;
/// `remaining_free_uses` sentinel for an always-free category.
pub const REMAINING_UNLIMITED: i64 = -1;

/// Unique constraint backing the at-most-once guarantee.
const IDEMPOTENCY_KEY_CONSTRAINT: &str = "payments_idempotency_key_key";

/// A service request reaching the decision engine.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub caller_id: String,
    pub recipient_id: String,
    pub caller_phone: String,
    pub category: ServiceCategory,
    /// Explicit operator choice; inferred from the phone prefix when absent.
    pub provider: Option<ProviderName>,
    pub idempotency_key: Option<String>,
}

/// Expected outcomes of orchestration. These are data, not errors.
#[derive(Debug, Clone)]
pub enum OrchestrationOutcome {
    /// Free credit consumed; the session is live.
    Granted { room_id: String, remaining: i64 },
    /// Zero-fee category past its quota; the session is live, nothing counted.
    AlwaysFree { room_id: String },
    /// Quota exhausted; the caller must dial and settle before provisioning.
    PaymentRequired {
        reference: String,
        amount: BigDecimal,
        currency: String,
        provider: ProviderName,
        dial_code: String,
        expires_at: DateTime<Utc>,
        status: PaymentStatus,
    },
}

#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub outcome: OrchestrationOutcome,
    /// True when this echoes the outcome of an earlier request with the same
    /// idempotency key; no side effect was performed.
    pub replayed: bool,
}

fn room_kind_for(category: ServiceCategory) -> RoomKind {
    match category {
        ServiceCategory::Doctor | ServiceCategory::Nurse => RoomKind::Voice,
        ServiceCategory::Biker | ServiceCategory::Taxi => RoomKind::Dispatch,
        ServiceCategory::BloodRequest => RoomKind::Voice,
    }
}

fn generate_reference(category: ServiceCategory) -> String {
    format!("{}-{}", category.as_str(), Uuid::new_v4().simple())
}

pub struct ServiceOrchestrator {
    usage: Arc<dyn UsageLedger>,
    payments: Arc<dyn PaymentStore>,
    rooms: Arc<dyn RoomProvisioner>,
    billing: BillingConfig,
}

impl ServiceOrchestrator {
    pub fn new(
        usage: Arc<dyn UsageLedger>,
        payments: Arc<dyn PaymentStore>,
        rooms: Arc<dyn RoomProvisioner>,
        billing: BillingConfig,
    ) -> Self {
        Self {
            usage,
            payments,
            rooms,
            billing,
        }
    }

    /// Free credits left for a user in a category.
    pub async fn remaining_free_uses(
        &self,
        user_id: &str,
        category: ServiceCategory,
    ) -> Result<i64, AppError> {
        let limit = self.billing.free_limit(category);
        Ok(self
            .usage
            .remaining(user_id, category.as_str(), limit)
            .await?)
    }

    /// Decide free-vs-paid for one service request and perform the chosen
    /// branch. The idempotency check strictly precedes any mutation.
    pub async fn handle(&self, request: ServiceRequest) -> Result<OrchestrationResult, AppError> {
        validate_msisdn(&request.caller_phone)?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.payments.get_by_idempotency_key(key).await? {
                info!(
                    idempotency_key = %key,
                    reference = %existing.reference,
                    "duplicate request, replaying recorded outcome"
                );
                return Ok(self.replay(existing));
            }
        }

        let free_limit = self.billing.free_limit(request.category);
        let used = self
            .usage
            .count_uses(&request.caller_id, request.category.as_str())
            .await?;

        if used < free_limit {
            return self.grant_free(&request, free_limit, used).await;
        }

        match self.billing.fee(request.category) {
            Some(fee) if fee > BigDecimal::from(0) => self.require_payment(&request, fee).await,
            Some(_zero) => self.grant_always_free(&request).await,
            None => {
                error!(
                    user_id = %request.caller_id,
                    category = %request.category,
                    free_limit,
                    "quota exhausted but no fee configured for category"
                );
                Err(AppError::new(AppErrorKind::Domain(
                    DomainError::QuotaExceededNoFeeConfigured {
                        user_id: request.caller_id.clone(),
                        category: request.category.to_string(),
                    },
                )))
            }
        }
    }

    // =========================================================================
    // Branches
    // =========================================================================

    async fn grant_free(
        &self,
        request: &ServiceRequest,
        free_limit: i64,
        used: i64,
    ) -> Result<OrchestrationResult, AppError> {
        // Provision before counting: a provisioning failure must not burn a
        // free credit.
        let room_id = self
            .rooms
            .create_room(
                room_kind_for(request.category),
                &request.caller_id,
                &request.recipient_id,
            )
            .await?;

        let remaining = (free_limit - used - 1).max(0);
        let record = self
            .record_grant(request, "free", &room_id, Some(remaining))
            .await?;

        let Some(record) = record else {
            // Lost the creation race; the winner's outcome stands.
            return self.replay_for_key(request).await;
        };

        self.usage
            .increment_usage(&request.caller_id, request.category.as_str())
            .await?;

        info!(
            user_id = %request.caller_id,
            category = %request.category,
            room_id = %room_id,
            reference = %record.reference,
            remaining,
            "free usage granted"
        );

        Ok(OrchestrationResult {
            outcome: OrchestrationOutcome::Granted { room_id, remaining },
            replayed: false,
        })
    }

    async fn grant_always_free(
        &self,
        request: &ServiceRequest,
    ) -> Result<OrchestrationResult, AppError> {
        let room_id = self
            .rooms
            .create_room(
                room_kind_for(request.category),
                &request.caller_id,
                &request.recipient_id,
            )
            .await?;

        let record = self
            .record_grant(request, "always_free", &room_id, None)
            .await?;

        let Some(record) = record else {
            return self.replay_for_key(request).await;
        };

        info!(
            user_id = %request.caller_id,
            category = %request.category,
            room_id = %room_id,
            reference = %record.reference,
            "always-free service granted"
        );

        Ok(OrchestrationResult {
            outcome: OrchestrationOutcome::AlwaysFree { room_id },
            replayed: false,
        })
    }

    async fn require_payment(
        &self,
        request: &ServiceRequest,
        fee: BigDecimal,
    ) -> Result<OrchestrationResult, AppError> {
        let provider = request
            .provider
            .unwrap_or_else(|| ProviderName::from_msisdn(&request.caller_phone));
        let reference = generate_reference(request.category);
        let signature = signature::sign(
            &self.billing.signature_secret,
            &reference,
            &fee,
            &request.caller_phone,
        );
        let dial_code = ussd::dial_code(self.billing.dial_config(provider), &fee);
        let expires_at = Utc::now() + self.billing.payment_timeout();

        let new = NewPayment {
            reference,
            idempotency_key: self.idempotency_key_for(request),
            user_id: request.caller_id.clone(),
            user_phone: request.caller_phone.clone(),
            service_category: request.category.to_string(),
            amount: fee.clone(),
            currency: self.billing.currency.clone(),
            provider,
            signature,
            status: PaymentStatus::Pending,
            expires_at,
            metadata: json!({ "branch": "paid", "dial_code": dial_code }),
        };

        let record = match self.payments.create(new).await {
            Ok(record) => record,
            Err(err) if err.violates_constraint(IDEMPOTENCY_KEY_CONSTRAINT) => {
                return self.replay_for_key(request).await;
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            user_id = %request.caller_id,
            category = %request.category,
            reference = %record.reference,
            amount = %fee,
            provider = %provider,
            expires_at = %expires_at,
            "payment required, dial code issued"
        );

        Ok(OrchestrationResult {
            outcome: OrchestrationOutcome::PaymentRequired {
                reference: record.reference,
                amount: fee,
                currency: self.billing.currency.clone(),
                provider,
                dial_code,
                expires_at,
                status: PaymentStatus::Pending,
            },
            replayed: false,
        })
    }

    // =========================================================================
    // Idempotency plumbing
    // =========================================================================

    fn idempotency_key_for(&self, request: &ServiceRequest) -> String {
        // Keyless requests still need the unique column satisfied; a random
        // key makes them single-shot.
        request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| format!("auto-{}", Uuid::new_v4().simple()))
    }

    /// Persist a grant outcome as an amount-0 SUCCESS row so a retried
    /// request replays the identical result without re-incrementing.
    /// Returns `Ok(None)` when another request holding the same idempotency
    /// key won the insert.
    async fn record_grant(
        &self,
        request: &ServiceRequest,
        branch: &str,
        room_id: &str,
        remaining: Option<i64>,
    ) -> Result<Option<PaymentRecord>, AppError> {
        let provider = request
            .provider
            .unwrap_or_else(|| ProviderName::from_msisdn(&request.caller_phone));
        let reference = generate_reference(request.category);
        let amount = BigDecimal::from(0);
        let signature = signature::sign(
            &self.billing.signature_secret,
            &reference,
            &amount,
            &request.caller_phone,
        );

        let mut metadata = json!({ "branch": branch, "room_id": room_id });
        if let Some(remaining) = remaining {
            metadata["remaining"] = json!(remaining);
        }

        let new = NewPayment {
            reference,
            idempotency_key: self.idempotency_key_for(request),
            user_id: request.caller_id.clone(),
            user_phone: request.caller_phone.clone(),
            service_category: request.category.to_string(),
            amount,
            currency: self.billing.currency.clone(),
            provider,
            signature,
            status: PaymentStatus::Success,
            expires_at: Utc::now() + self.billing.payment_timeout(),
            metadata,
        };

        match self.payments.create(new).await {
            Ok(record) => Ok(Some(record)),
            Err(err)
                if err.violates_constraint(IDEMPOTENCY_KEY_CONSTRAINT)
                    && request.idempotency_key.is_some() =>
            {
                warn!(
                    idempotency_key = %request.idempotency_key.as_deref().unwrap_or_default(),
                    "lost idempotency creation race; an unused room was provisioned"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// After losing a creation race, return the winner's recorded outcome.
    async fn replay_for_key(
        &self,
        request: &ServiceRequest,
    ) -> Result<OrchestrationResult, AppError> {
        let key = request.idempotency_key.as_deref().ok_or_else(|| {
            AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::Database {
                    message: "unique violation without a client idempotency key".to_string(),
                    is_retryable: false,
                },
            ))
        })?;

        let existing = self
            .payments
            .get_by_idempotency_key(key)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Infrastructure(
                    InfrastructureError::Database {
                        message: format!(
                            "idempotency key '{}' collided but owner row is missing",
                            key
                        ),
                        is_retryable: true,
                    },
                ))
            })?;

        Ok(self.replay(existing))
    }

    /// Rebuild the caller-visible outcome from a previously recorded row.
    fn replay(&self, record: PaymentRecord) -> OrchestrationResult {
        let branch = record
            .metadata
            .get("branch")
            .and_then(|b| b.as_str())
            .unwrap_or("paid");

        let outcome = match branch {
            "free" => OrchestrationOutcome::Granted {
                room_id: record.room_id().unwrap_or_default().to_string(),
                remaining: record
                    .metadata
                    .get("remaining")
                    .and_then(|r| r.as_i64())
                    .unwrap_or(0),
            },
            "always_free" => OrchestrationOutcome::AlwaysFree {
                room_id: record.room_id().unwrap_or_default().to_string(),
            },
            _ => OrchestrationOutcome::PaymentRequired {
                dial_code: record.dial_code().unwrap_or_default().to_string(),
                provider: ProviderName::from_str(&record.provider)
                    .unwrap_or(ProviderName::Other),
                status: record.state().unwrap_or(PaymentStatus::Pending),
                expires_at: record.expires_at,
                currency: record.currency.clone(),
                amount: record.amount.clone(),
                reference: record.reference,
            },
        };

        OrchestrationResult {
            outcome,
            replayed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_carries_category_prefix() {
        let reference = generate_reference(ServiceCategory::Doctor);
        assert!(reference.starts_with("doctor-"));
        assert_ne!(reference, generate_reference(ServiceCategory::Doctor));
    }

    #[test]
    fn room_kinds_follow_category() {
        assert_eq!(room_kind_for(ServiceCategory::Doctor), RoomKind::Voice);
        assert_eq!(room_kind_for(ServiceCategory::Nurse), RoomKind::Voice);
        assert_eq!(room_kind_for(ServiceCategory::Biker), RoomKind::Dispatch);
        assert_eq!(room_kind_for(ServiceCategory::Taxi), RoomKind::Dispatch);
        assert_eq!(
            room_kind_for(ServiceCategory::BloodRequest),
            RoomKind::Voice
        );
    }
}
