//! MTN Mobile Money collections status client.
//!
//! Used only by the reconciliation worker: given the provider transaction id
//! a payer (or admin) attached to a record, asks the MoMo API what actually
//! happened to the collection. Collections themselves are never initiated
//! programmatically here.

use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::payments::provider::{ProviderStatusSource, ProviderVerdict};
use crate::payments::types::ProviderName;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub base_url: String,
    pub api_key: String,
    pub subscription_key: String,
    pub target_environment: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://proxy.momoapi.mtn.com/collection".to_string(),
            api_key: String::new(),
            subscription_key: String::new(),
            target_environment: "mtncameroon".to_string(),
            request_timeout: Duration::from_secs(15),
            max_retries: 2,
        }
    }
}

impl MomoConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("MOMO_BASE_URL") {
            cfg.base_url = url;
        }
        cfg.api_key = std::env::var("MOMO_API_KEY").unwrap_or_default();
        cfg.subscription_key = std::env::var("MOMO_SUBSCRIPTION_KEY").unwrap_or_default();
        if let Ok(env_name) = std::env::var("MOMO_TARGET_ENVIRONMENT") {
            cfg.target_environment = env_name;
        }
        cfg.request_timeout = Duration::from_secs(
            std::env::var("MOMO_REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.request_timeout.as_secs()),
        );
        cfg.max_retries = std::env::var("MOMO_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(cfg.max_retries);
        cfg
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.subscription_key.is_empty()
    }
}

/// Wire shape of `GET /v1_0/requesttopay/{referenceId}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestToPayStatus {
    status: String,
    amount: Option<String>,
    payer: Option<MomoParty>,
    reason: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoParty {
    party_id: Option<String>,
}

impl RequestToPayStatus {
    fn into_verdict(self) -> ProviderVerdict {
        match self.status.to_uppercase().as_str() {
            "SUCCESSFUL" => ProviderVerdict::Succeeded {
                amount: self
                    .amount
                    .as_deref()
                    .and_then(|a| BigDecimal::from_str(a).ok()),
                payer_phone: self.payer.and_then(|p| p.party_id),
            },
            "FAILED" | "REJECTED" | "TIMEOUT" => ProviderVerdict::Failed {
                reason: self.reason.map(|r| match r {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
            },
            _ => ProviderVerdict::StillPending,
        }
    }
}

pub struct MomoStatusClient {
    http: reqwest::Client,
    config: MomoConfig,
}

impl MomoStatusClient {
    pub fn new(config: MomoConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: ProviderName::Mtn.to_string(),
                    message: format!("failed to initialize HTTP client: {}", e),
                    is_retryable: false,
                }))
            })?;
        Ok(Self { http, config })
    }

    fn provider_error(&self, message: String, is_retryable: bool) -> AppError {
        AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: ProviderName::Mtn.to_string(),
            message,
            is_retryable,
        }))
    }

    async fn get_status(&self, provider_tx_id: &str) -> Result<RequestToPayStatus, AppError> {
        let url = format!(
            "{}/v1_0/requesttopay/{}",
            self.config.base_url.trim_end_matches('/'),
            provider_tx_id
        );

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
                .header("X-Target-Environment", &self.config.target_environment)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<RequestToPayStatus>(&text).map_err(|e| {
                            self.provider_error(
                                format!("invalid provider JSON response: {}", e),
                                false,
                            )
                        });
                    }

                    if (status.as_u16() == 429 || status.is_server_error())
                        && attempt < self.config.max_retries
                    {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "momo status request failed, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(self.provider_error(
                        format!("HTTP {}: {}", status, text),
                        status.is_server_error(),
                    ));
                }
                Err(e) => {
                    last_error = Some(self.provider_error(
                        format!("momo status request failed: {}", e),
                        true,
                    ));
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| self.provider_error("momo status retries exhausted".into(), true)))
    }
}

#[async_trait]
impl ProviderStatusSource for MomoStatusClient {
    async fn fetch_status(
        &self,
        provider: ProviderName,
        provider_tx_id: &str,
    ) -> Result<ProviderVerdict, AppError> {
        if provider != ProviderName::Mtn {
            return Err(AppError::new(AppErrorKind::External(
                ExternalError::PaymentProvider {
                    provider: provider.to_string(),
                    message: "no status source configured for this operator".to_string(),
                    is_retryable: false,
                },
            )));
        }

        Ok(self.get_status(provider_tx_id).await?.into_verdict())
    }
}
