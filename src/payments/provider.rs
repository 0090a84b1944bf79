use crate::error::AppError;
use crate::payments::types::ProviderName;
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// Provider-side view of a collection attempt, as reported by the operator's
/// API for a given provider transaction id.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderVerdict {
    /// Funds arrived. Amount and payer are echoed when the operator reports
    /// them so the confirmation cross-check can run against real values.
    Succeeded {
        amount: Option<BigDecimal>,
        payer_phone: Option<String>,
    },
    /// The operator rejected or reversed the collection.
    Failed { reason: Option<String> },
    /// Still in flight on the operator side.
    StillPending,
}

/// Read-only status source for the reconciliation worker.
///
/// The dominant flow in this system is a manually dialed USSD push with an
/// admin confirming the SMS receipt, so implementations of this trait are an
/// optional complement, not a dependency of the request path.
#[async_trait]
pub trait ProviderStatusSource: Send + Sync {
    async fn fetch_status(
        &self,
        provider: ProviderName,
        provider_tx_id: &str,
    ) -> Result<ProviderVerdict, AppError>;
}
