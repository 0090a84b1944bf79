use crate::database::repository::PaymentStore;
use crate::payments::provider::{ProviderStatusSource, ProviderVerdict};
use crate::payments::types::{PaymentStatus, ProviderName};
use crate::services::confirmation::{ConfirmationRequest, ConfirmationService};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// Typed errors produced inside a reconciliation cycle.
///
/// These never propagate past the worker loop; each record is handled in its
/// own scope so one bad row cannot abort the batch, and the whole cycle is
/// retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] crate::database::error::DatabaseError),

    /// Confirming or cancelling a record failed.
    #[error("transition error for payment {reference}: {message}")]
    Transition { reference: String, message: String },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often the worker polls the provider for in-doubt payments.
    pub poll_interval: Duration,
    /// Maximum records fetched per cycle.
    pub batch_size: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            batch_size: 100,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("RECONCILE_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Resolves in-doubt payments against the provider's ledger.
///
/// Only records that already carry a provider transaction id are eligible;
/// purely manual payments stay with the admin confirmation flow. A provider
/// "succeeded" verdict is pushed through the same cross-checked confirmation
/// path the admin endpoint uses, so a lying or confused provider response
/// cannot settle a record it does not match.
pub struct ReconciliationWorker {
    payments: Arc<dyn PaymentStore>,
    source: Arc<dyn ProviderStatusSource>,
    confirmer: Arc<ConfirmationService>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        source: Arc<dyn ProviderStatusSource>,
        confirmer: Arc<ConfirmationService>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            payments,
            source,
            confirmer,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "reconciliation cycle failed");
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    pub async fn run_cycle(&self) -> Result<(), ReconcileError> {
        let pending = self
            .payments
            .find_reconcilable(self.config.batch_size)
            .await?;

        let mut resolved = 0usize;
        for record in pending {
            let Some(tx_id) = record.provider_tx_id.clone() else {
                continue;
            };
            let provider =
                ProviderName::from_str(&record.provider).unwrap_or(ProviderName::Other);

            let verdict = match self.source.fetch_status(provider, &tx_id).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    // Transient or unsupported-operator failure; leave the
                    // record for the admin flow or a later cycle.
                    debug!(
                        reference = %record.reference,
                        provider = %provider,
                        error = %e,
                        "provider status unavailable"
                    );
                    continue;
                }
            };

            match verdict {
                ProviderVerdict::StillPending => continue,
                ProviderVerdict::Succeeded {
                    amount,
                    payer_phone,
                } => {
                    // Fall back to stored values when the provider omits
                    // fields; the cross-check still runs against them.
                    let request = ConfirmationRequest {
                        reference: record.reference.clone(),
                        payer_phone: payer_phone.unwrap_or_else(|| record.user_phone.clone()),
                        provider,
                        amount: amount.unwrap_or_else(|| record.amount.clone()),
                        provider_tx_id: Some(tx_id),
                    };
                    match self.confirmer.confirm(request).await {
                        Ok(_) => resolved += 1,
                        Err(e) => {
                            warn!(
                                reference = %record.reference,
                                error = %e,
                                "provider reported success but confirmation was rejected"
                            );
                        }
                    }
                }
                ProviderVerdict::Failed { reason } => {
                    if let Err(e) = self.mark_failed(&record.reference, record.state()).await {
                        warn!(
                            reference = %record.reference,
                            error = %e,
                            "failed to apply provider failure verdict"
                        );
                    } else {
                        resolved += 1;
                        info!(
                            reference = %record.reference,
                            reason = reason.as_deref().unwrap_or("unspecified"),
                            "payment failed per provider verdict"
                        );
                    }
                }
            }
        }

        if resolved > 0 {
            info!(resolved, "reconciled in-doubt payments");
        }
        Ok(())
    }

    /// A provider-side failure fails a PENDING row; a row already in
    /// AWAITING_VERIFICATION has no failed edge, so it is cancelled instead.
    async fn mark_failed(
        &self,
        reference: &str,
        state: Option<PaymentStatus>,
    ) -> Result<(), ReconcileError> {
        let outcome = match state {
            Some(PaymentStatus::AwaitingVerification) => self.payments.cancel(reference).await?,
            _ => self.payments.expire(reference).await?,
        };

        // None means a concurrent writer already resolved the row, which is
        // exactly the idempotence we want.
        if outcome.is_none() {
            debug!(reference = %reference, "row already resolved before failure verdict applied");
        }
        Ok(())
    }
}
