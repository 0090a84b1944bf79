use crate::error::{AppError, AppErrorKind, ValidationError};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

// ============================================================================
// Providers
// ============================================================================

/// Mobile-money operators the platform collects through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderName {
    Mtn,
    Orange,
    Other,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Mtn => "MTN",
            ProviderName::Orange => "ORANGE",
            ProviderName::Other => "OTHER",
        }
    }

    /// Best-effort operator detection from a Cameroonian 9-digit MSISDN.
    /// 650-654 and 67x blocks belong to MTN, 655-659 and 69x to Orange.
    /// Anything unrecognized falls back to MTN, the dominant collector.
    pub fn from_msisdn(phone: &str) -> Self {
        let digits: Vec<u8> = phone.bytes().take(3).map(|b| b.wrapping_sub(b'0')).collect();
        match digits.as_slice() {
            [6, 7, _] => ProviderName::Mtn,
            [6, 9, _] => ProviderName::Orange,
            [6, 5, d] if *d <= 4 => ProviderName::Mtn,
            [6, 5, d] if *d <= 9 => ProviderName::Orange,
            _ => ProviderName::Mtn,
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mtn" | "mtn_momo" | "momo" => Ok(ProviderName::Mtn),
            "orange" | "orange_money" | "om" => Ok(ProviderName::Orange),
            "other" => Ok(ProviderName::Other),
            _ => Err(AppError::new(AppErrorKind::Validation(
                ValidationError::UnknownProvider {
                    provider: value.to_string(),
                },
            ))),
        }
    }
}

// ============================================================================
// Service categories
// ============================================================================

/// Billable service categories across the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Doctor,
    Nurse,
    Biker,
    Taxi,
    BloodRequest,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 5] = [
        ServiceCategory::Doctor,
        ServiceCategory::Nurse,
        ServiceCategory::Biker,
        ServiceCategory::Taxi,
        ServiceCategory::BloodRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Doctor => "doctor",
            ServiceCategory::Nurse => "nurse",
            ServiceCategory::Biker => "biker",
            ServiceCategory::Taxi => "taxi",
            ServiceCategory::BloodRequest => "blood_request",
        }
    }
}

impl std::fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "doctor" => Ok(ServiceCategory::Doctor),
            "nurse" => Ok(ServiceCategory::Nurse),
            "biker" | "bike" => Ok(ServiceCategory::Biker),
            "taxi" => Ok(ServiceCategory::Taxi),
            "blood_request" | "blood" => Ok(ServiceCategory::BloodRequest),
            _ => Err(AppError::new(AppErrorKind::Validation(
                ValidationError::UnknownServiceCategory {
                    category: value.to_string(),
                },
            ))),
        }
    }
}

// ============================================================================
// Payment lifecycle state machine
// ============================================================================

/// Lifecycle state of a payment attempt.
///
/// The only legal moves are the ones `valid_transitions` returns; every
/// store-side UPDATE also carries the current status in its predicate so a
/// racing writer cannot resurrect a terminal row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Record created; waiting for the payer to dial and settle.
    Pending,
    /// Payer claims to have paid; waiting for a human or automated check.
    AwaitingVerification,
    /// Settled. Free (amount-0) grants are born in this state.
    Success,
    /// Expired or provider-declined. Terminal.
    Failed,
    /// Withdrawn by an admin or the payer before settlement. Terminal.
    Cancelled,
    /// Settled then returned. Terminal.
    Refunded,
}

impl PaymentStatus {
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::AwaitingVerification,
                PaymentStatus::Success,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::AwaitingVerification => {
                &[PaymentStatus::Success, PaymentStatus::Cancelled]
            }
            PaymentStatus::Success => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_uppercase().as_str() {
            "PENDING" => Some(PaymentStatus::Pending),
            "AWAITING_VERIFICATION" => Some(PaymentStatus::AwaitingVerification),
            "SUCCESS" => Some(PaymentStatus::Success),
            "FAILED" => Some(PaymentStatus::Failed),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_db_status(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::AwaitingVerification => "AWAITING_VERIFICATION",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_status())
    }
}

// ============================================================================
// Payment entities
// ============================================================================

/// One row of the `payments` ledger. Rows are never deleted.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub reference: String,
    pub idempotency_key: String,
    pub user_id: String,
    pub user_phone: String,
    pub service_category: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: String,
    pub provider_tx_id: Option<String>,
    pub signature: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn state(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_db_status(&self.status)
    }

    pub fn is_paid(&self) -> bool {
        self.state() == Some(PaymentStatus::Success)
    }

    /// Room id recorded at grant time (free and always-free branches).
    pub fn room_id(&self) -> Option<&str> {
        self.metadata.get("room_id").and_then(|v| v.as_str())
    }

    /// Dial code handed to the payer at creation time (paid branch).
    pub fn dial_code(&self) -> Option<&str> {
        self.metadata.get("dial_code").and_then(|v| v.as_str())
    }
}

/// Input for inserting a new payment row.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reference: String,
    pub idempotency_key: String,
    pub user_id: String,
    pub user_phone: String,
    pub service_category: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderName,
    pub signature: String,
    pub status: PaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub metadata: JsonValue,
}

/// Filters for the admin dashboard listing.
#[derive(Debug, Clone, Default)]
pub struct PaymentListFilter {
    pub status: Option<PaymentStatus>,
    pub provider: Option<ProviderName>,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Phone validation
// ============================================================================

static MSISDN_RE: OnceLock<regex::Regex> = OnceLock::new();

/// Validates a 9-digit mobile-money number (e.g. 677123456).
pub fn validate_msisdn(phone: &str) -> Result<(), AppError> {
    let re = MSISDN_RE.get_or_init(|| regex::Regex::new(r"^\d{9}$").expect("static regex"));
    if re.is_match(phone) {
        Ok(())
    } else {
        Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidPhoneNumber {
                phone: phone.to_string(),
                reason: "expected a 9-digit mobile money number".to_string(),
            },
        )))
    }
}
