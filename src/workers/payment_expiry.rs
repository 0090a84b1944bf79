use crate::database::repository::PaymentStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    /// How often the sweeper wakes up to fail overdue PENDING payments.
    pub sweep_interval: Duration,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ExpirySweeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.sweep_interval = Duration::from_secs(
            std::env::var("PAYMENT_SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.sweep_interval.as_secs()),
        );
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Periodically fails PENDING payments past their deadline.
///
/// Each cycle is one bulk UPDATE whose `status = PENDING` predicate is the
/// concurrency guard: a row confirmed while the sweeper runs is simply
/// skipped. Single-flight per tick falls out of the loop shape; the next
/// cycle starts only after the previous one returned.
pub struct ExpirySweeperWorker {
    payments: Arc<dyn PaymentStore>,
    config: ExpirySweeperConfig,
}

impl ExpirySweeperWorker {
    pub fn new(payments: Arc<dyn PaymentStore>, config: ExpirySweeperConfig) -> Self {
        Self { payments, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "payment expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment expiry sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        // Next tick retries; nothing to roll back since each
                        // row transition is independent.
                        warn!(error = %e, "expiry sweep cycle failed");
                    }
                }
            }
        }

        info!("payment expiry sweeper stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let expired = self.payments.expire_due(Utc::now()).await?;
        if expired > 0 {
            info!(expired, "expired unconfirmed payments");
        }
        Ok(())
    }
}
