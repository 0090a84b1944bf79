//! Storage capability traits.
//!
//! The orchestrator, confirmation service and background workers depend on
//! these seams only; postgres implementations live beside them and tests run
//! against in-memory implementations. All cross-request coordination goes
//! through the guarantees these contracts state (atomic upsert for usage,
//! uniqueness on idempotency keys, guarded status transitions).

use crate::database::error::DatabaseError;
use crate::payments::types::{NewPayment, PaymentListFilter, PaymentRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Tracks free-use consumption per (user, service category) pair.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Current used count; an unknown user reads as 0, never an error.
    async fn count_uses(&self, user_id: &str, category: &str) -> Result<i64, DatabaseError>;

    /// Atomically create-or-increment the counter and return the new count.
    /// Two concurrent calls for the same pair must both land.
    async fn increment_usage(&self, user_id: &str, category: &str) -> Result<i64, DatabaseError>;

    /// Free credits left under `free_limit`, clamped at zero.
    async fn remaining(
        &self,
        user_id: &str,
        category: &str,
        free_limit: i64,
    ) -> Result<i64, DatabaseError> {
        let used = self.count_uses(user_id, category).await?;
        Ok((free_limit - used).max(0))
    }
}

/// Durable payment ledger with guarded lifecycle transitions.
///
/// Transition methods return `Ok(None)` when the guard predicate did not
/// match (the row was not in an eligible state, or does not exist); callers
/// re-read to distinguish a lost race from a missing row. Rows are never
/// deleted.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new row. A collision on `idempotency_key` surfaces as a
    /// unique-violation `DatabaseError`; the caller resolves it by fetching
    /// the existing row, never by reporting a failure outward.
    async fn create(&self, new: NewPayment) -> Result<PaymentRecord, DatabaseError>;

    async fn get_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// PENDING -> AWAITING_VERIFICATION, recording the payer-supplied
    /// provider transaction id.
    async fn mark_awaiting_verification(
        &self,
        reference: &str,
        provider_tx_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// PENDING | AWAITING_VERIFICATION -> SUCCESS. Sets `confirmed_at` and,
    /// when given, the provider transaction id. The status guard in the
    /// UPDATE predicate is the defence against a concurrent sweep.
    async fn confirm(
        &self,
        reference: &str,
        provider_tx_id: Option<&str>,
        confirmed_at: DateTime<Utc>,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// PENDING -> FAILED for a single overdue or provider-declined row.
    async fn expire(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// PENDING | AWAITING_VERIFICATION -> CANCELLED.
    async fn cancel(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// SUCCESS -> REFUNDED.
    async fn refund(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Bulk-fail every PENDING row past its deadline in one statement and
    /// return how many moved. The `status = PENDING` predicate makes the
    /// sweep safe against concurrent confirmations.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;

    /// Non-terminal rows carrying a provider transaction id, oldest first,
    /// for the reconciliation worker.
    async fn find_reconcilable(&self, limit: i64) -> Result<Vec<PaymentRecord>, DatabaseError>;

    /// Paginated admin listing with optional status/provider filters.
    /// Returns (total matching, page of rows).
    async fn list(
        &self,
        filter: PaymentListFilter,
    ) -> Result<(i64, Vec<PaymentRecord>), DatabaseError>;
}
