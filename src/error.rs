//! Unified error handling for the Carelink backend.
//!
//! One layered error type with HTTP status mapping, user-friendly messages,
//! and structured error codes for client handling. Expected alternate
//! outcomes of orchestration (free grant vs payment required) are NOT errors;
//! they are modeled as `OrchestrationOutcome` variants. Everything here is a
//! genuine fault or rejection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "DUPLICATE_IDEMPOTENCY_KEY")]
    DuplicateIdempotencyKey,
    #[serde(rename = "PAYMENT_MISMATCH")]
    PaymentMismatch,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "ROOM_PROVISIONING_ERROR")]
    RoomProvisioningError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No payment row for the given reference
    PaymentNotFound { reference: String },
    /// Another request already owns this idempotency key. Never surfaced to
    /// the end user; the orchestrator resolves it by replaying the winner's
    /// outcome.
    DuplicateIdempotencyKey { idempotency_key: String },
    /// Confirmation details do not match the stored record/signature
    PaymentMismatch { reference: String, reason: String },
    /// Requested transition is not allowed by the state machine
    InvalidStateTransition {
        reference: String,
        from: String,
        to: String,
    },
    /// Quota exhausted and no fee configured for the category. A server-side
    /// misconfiguration, not a user mistake.
    QuotaExceededNoFeeConfigured { user_id: String, category: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (mobile-money provider, room provisioning)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Mobile-money provider (MTN, Orange) error
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Call/chat/dispatch room could not be provisioned
    RoomProvisioning { message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Not a 9-digit mobile money number
    InvalidPhoneNumber { phone: String, reason: String },
    /// Unrecognized service category
    UnknownServiceCategory { category: String },
    /// Unrecognized payment provider
    UnknownProvider { provider: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::DuplicateIdempotencyKey { .. } => 409, // Conflict
                DomainError::PaymentMismatch { .. } => 409,
                DomainError::InvalidStateTransition { .. } => 409,
                // Misconfiguration is a server fault regardless of who asked
                DomainError::QuotaExceededNoFeeConfigured { .. } => 500,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::RoomProvisioning { .. } => 502,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::DuplicateIdempotencyKey { .. } => ErrorCode::DuplicateIdempotencyKey,
                DomainError::PaymentMismatch { .. } => ErrorCode::PaymentMismatch,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::QuotaExceededNoFeeConfigured { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RoomProvisioning { .. } => ErrorCode::RoomProvisioningError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::DuplicateIdempotencyKey { .. } => {
                    "Request already processed".to_string()
                }
                DomainError::PaymentMismatch { reference, reason } => {
                    format!("Confirmation rejected for '{}': {}", reference, reason)
                }
                DomainError::InvalidStateTransition {
                    reference,
                    from,
                    to,
                } => {
                    format!(
                        "Payment '{}' cannot move from {} to {}",
                        reference, from, to
                    )
                }
                DomainError::QuotaExceededNoFeeConfigured { .. } => {
                    "Service temporarily unavailable. Please try again later".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RoomProvisioning { .. } => {
                    "Could not start the session. Please try again".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhoneNumber { phone, reason } => {
                    format!("Invalid phone number '{}': {}", phone, reason)
                }
                ValidationError::UnknownServiceCategory { category } => {
                    format!("Unknown service category '{}'", category)
                }
                ValidationError::UnknownProvider { provider } => {
                    format!("Unsupported payment provider '{}'", provider)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RoomProvisioning { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<crate::database::error::DatabaseError> for AppError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}
