//! Payment and quota HTTP handlers.

use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::{
    app_error_response, get_request_id_from_headers, json_error_response, ErrorResponse,
};
use crate::payments::types::{
    PaymentListFilter, PaymentRecord, PaymentStatus, ProviderName, ServiceCategory,
};
use crate::services::confirmation::{ConfirmationRequest, ConfirmationService};
use crate::services::orchestrator::{
    OrchestrationOutcome, OrchestrationResult, ServiceOrchestrator, ServiceRequest,
    REMAINING_DUPLICATE, REMAINING_UNLIMITED,
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Clone)]
pub struct PaymentsState {
    pub orchestrator: Arc<ServiceOrchestrator>,
    pub confirmation: Arc<ConfirmationService>,
    pub payments: Arc<dyn PaymentStore>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RemainingQuery {
    pub user_id: String,
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct FreeUsageResponse {
    pub remaining: i64,
}

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub user_id: String,
    pub recipient_id: String,
    pub phone: String,
    pub category: String,
    pub provider: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub success: bool,
    pub message: String,
    pub remaining_free_uses: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dial_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AwaitingRequest {
    pub reference: String,
    pub provider_tx_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub reference: String,
    pub payer_phone: String,
    pub provider: String,
    /// Decimal as a string; floats are rejected at the type level.
    pub amount: String,
    pub provider_tx_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub reference: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub provider: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentItem {
    pub id: String,
    pub reference: String,
    pub user_id: String,
    pub payer_phone: String,
    pub service_category: String,
    pub amount: String,
    pub currency: String,
    pub provider: String,
    pub status: String,
    pub provider_tx_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<PaymentItem>,
}

impl PaymentItem {
    fn from_record(record: PaymentRecord) -> Self {
        Self {
            id: record.id.to_string(),
            reference: record.reference,
            user_id: record.user_id,
            payer_phone: record.user_phone,
            service_category: record.service_category,
            amount: record.amount.to_string(),
            currency: record.currency,
            provider: record.provider,
            status: record.status,
            provider_tx_id: record.provider_tx_id,
            expires_at: record.expires_at,
            confirmed_at: record.confirmed_at,
            created_at: record.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /v1/payments/remaining
pub async fn remaining_free_uses(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Query(query): Query<RemainingQuery>,
) -> Result<Json<FreeUsageResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    let category = ServiceCategory::from_str(&query.category)
        .map_err(|e| app_error_response(e, request_id.clone()))?;

    state
        .orchestrator
        .remaining_free_uses(&query.user_id, category)
        .await
        .map(|remaining| Json(FreeUsageResponse { remaining }))
        .map_err(|e| app_error_response(e, request_id))
}

/// POST /v1/payments/initiate
pub async fn initiate(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    if payload.user_id.trim().is_empty() {
        return Err(missing_field("user_id", request_id));
    }
    if payload.recipient_id.trim().is_empty() {
        return Err(missing_field("recipient_id", request_id));
    }

    let category = ServiceCategory::from_str(&payload.category)
        .map_err(|e| app_error_response(e, request_id.clone()))?;
    let provider = match payload.provider.as_deref() {
        Some(raw) => Some(
            ProviderName::from_str(raw).map_err(|e| app_error_response(e, request_id.clone()))?,
        ),
        None => None,
    };

    let request = ServiceRequest {
        caller_id: payload.user_id,
        recipient_id: payload.recipient_id,
        caller_phone: payload.phone,
        category,
        provider,
        idempotency_key: payload.idempotency_key,
    };

    state
        .orchestrator
        .handle(request)
        .await
        .map(|result| Json(render_outcome(result)))
        .map_err(|e| app_error_response(e, request_id))
}

/// POST /v1/payments/awaiting
pub async fn awaiting_verification(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<AwaitingRequest>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    state
        .confirmation
        .mark_awaiting(&payload.reference, &payload.provider_tx_id)
        .await
        .map(|record| Json(status_response(record)))
        .map_err(|e| app_error_response(e, request_id))
}

/// POST /v1/payments/confirm
pub async fn confirm(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    let provider = ProviderName::from_str(&payload.provider)
        .map_err(|e| app_error_response(e, request_id.clone()))?;
    let amount = BigDecimal::from_str(&payload.amount).map_err(|_| {
        app_error_response(
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                amount: payload.amount.clone(),
                reason: "not a decimal number".to_string(),
            })),
            request_id.clone(),
        )
    })?;

    let request = ConfirmationRequest {
        reference: payload.reference,
        payer_phone: payload.payer_phone,
        provider,
        amount,
        provider_tx_id: payload.provider_tx_id,
    };

    state
        .confirmation
        .confirm(request)
        .await
        .map(|record| Json(status_response(record)))
        .map_err(|e| app_error_response(e, request_id))
}

/// POST /v1/payments/cancel
pub async fn cancel(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<ReferenceRequest>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    state
        .confirmation
        .cancel(&payload.reference)
        .await
        .map(|record| Json(status_response(record)))
        .map_err(|e| app_error_response(e, request_id))
}

/// POST /v1/payments/refund
pub async fn refund(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<ReferenceRequest>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    state
        .confirmation
        .refund(&payload.reference)
        .await
        .map(|record| Json(status_response(record)))
        .map_err(|e| app_error_response(e, request_id))
}

/// GET /v1/dashboard/payments
pub async fn list_payments(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<PaymentListResponse>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    let status = match query.status.as_deref() {
        Some(raw) => Some(PaymentStatus::from_db_status(raw).ok_or_else(|| {
            json_error_response(
                StatusCode::BAD_REQUEST,
                format!("'{}' is not a known payment status", raw),
                request_id.clone(),
            )
        })?),
        None => None,
    };
    let provider = match query.provider.as_deref() {
        Some(raw) => Some(
            ProviderName::from_str(raw).map_err(|e| app_error_response(e, request_id.clone()))?,
        ),
        None => None,
    };

    let filter = PaymentListFilter {
        status,
        provider,
        limit: query.limit.unwrap_or(50).clamp(1, 200),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let (limit, offset) = (filter.limit, filter.offset);

    state
        .payments
        .list(filter)
        .await
        .map(|(total, rows)| {
            Json(PaymentListResponse {
                total,
                limit,
                offset,
                items: rows.into_iter().map(PaymentItem::from_record).collect(),
            })
        })
        .map_err(|e| app_error_response(AppError::from(e), request_id))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn status_response(record: PaymentRecord) -> PaymentStatusResponse {
    PaymentStatusResponse {
        reference: record.reference,
        status: record.status,
        confirmed_at: record.confirmed_at,
    }
}

fn missing_field(field: &str, request_id: Option<String>) -> ApiError {
    app_error_response(
        AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.to_string(),
        })),
        request_id,
    )
}

fn render_outcome(result: OrchestrationResult) -> InitiateResponse {
    let mut response = match result.outcome {
        OrchestrationOutcome::Granted { room_id, remaining } => InitiateResponse {
            success: true,
            message: format!("Free usage granted. {} remaining.", remaining),
            remaining_free_uses: remaining,
            room_id: Some(room_id),
            reference: None,
            status: None,
            amount: None,
            currency: None,
            provider: None,
            dial_code: None,
            expires_at: None,
        },
        OrchestrationOutcome::AlwaysFree { room_id } => InitiateResponse {
            success: true,
            message: "Free service granted.".to_string(),
            remaining_free_uses: REMAINING_UNLIMITED,
            room_id: Some(room_id),
            reference: None,
            status: None,
            amount: None,
            currency: None,
            provider: None,
            dial_code: None,
            expires_at: None,
        },
        OrchestrationOutcome::PaymentRequired {
            reference,
            amount,
            currency,
            provider,
            dial_code,
            expires_at,
            status,
        } => InitiateResponse {
            success: true,
            message: "Payment required. Dial the code to complete the request.".to_string(),
            remaining_free_uses: 0,
            room_id: None,
            reference: Some(reference),
            status: Some(status),
            amount: Some(amount.to_string()),
            currency: Some(currency),
            provider: Some(provider),
            dial_code: Some(dial_code),
            expires_at: Some(expires_at),
        },
    };

    if result.replayed {
        response.remaining_free_uses = REMAINING_DUPLICATE;
        response.message = "Request already processed.".to_string();
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(replayed: bool) -> OrchestrationResult {
        OrchestrationResult {
            outcome: OrchestrationOutcome::Granted {
                room_id: "voice-room-1".to_string(),
                remaining: 4,
            },
            replayed,
        }
    }

    #[test]
    fn granted_outcome_reports_remaining() {
        let response = render_outcome(granted(false));
        assert!(response.success);
        assert_eq!(response.remaining_free_uses, 4);
        assert_eq!(response.room_id.as_deref(), Some("voice-room-1"));
        assert!(response.dial_code.is_none());
    }

    #[test]
    fn replayed_outcome_uses_duplicate_sentinel() {
        let response = render_outcome(granted(true));
        assert_eq!(response.remaining_free_uses, REMAINING_DUPLICATE);
        assert_eq!(response.room_id.as_deref(), Some("voice-room-1"));
    }

    #[test]
    fn payment_required_outcome_carries_dial_code() {
        let result = OrchestrationResult {
            outcome: OrchestrationOutcome::PaymentRequired {
                reference: "doctor-abc".to_string(),
                amount: BigDecimal::from(300),
                currency: "XAF".to_string(),
                provider: ProviderName::Mtn,
                dial_code: "*126*9*624488*300#".to_string(),
                expires_at: Utc::now(),
                status: PaymentStatus::Pending,
            },
            replayed: false,
        };
        let response = render_outcome(result);
        assert_eq!(response.remaining_free_uses, 0);
        assert_eq!(response.reference.as_deref(), Some("doctor-abc"));
        assert_eq!(response.dial_code.as_deref(), Some("*126*9*624488*300#"));
        assert_eq!(response.amount.as_deref(), Some("300"));
    }
}
