//! In-memory implementations of the storage and provisioning seams, used to
//! drive the orchestration and lifecycle scenarios without postgres.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use Carelink_backend::config::BillingConfig;
use Carelink_backend::database::error::{DatabaseError, DatabaseErrorKind};
use Carelink_backend::database::repository::{PaymentStore, UsageLedger};
use Carelink_backend::payments::types::{
    NewPayment, PaymentListFilter, PaymentRecord, PaymentStatus,
};
use Carelink_backend::rooms::{RoomError, RoomKind, RoomProvisioner};
use Carelink_backend::services::confirmation::ConfirmationService;
use Carelink_backend::services::orchestrator::ServiceOrchestrator;

// ---------------------------------------------------------------------------
// Usage ledger fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUsage {
    counts: Mutex<HashMap<(String, String), i64>>,
}

impl MemoryUsage {
    pub fn used(&self, user_id: &str, category: &str) -> i64 {
        self.counts
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), category.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_used(&self, user_id: &str, category: &str, used: i64) {
        self.counts
            .lock()
            .unwrap()
            .insert((user_id.to_string(), category.to_string()), used);
    }
}

#[async_trait]
impl UsageLedger for MemoryUsage {
    async fn count_uses(&self, user_id: &str, category: &str) -> Result<i64, DatabaseError> {
        Ok(self.used(user_id, category))
    }

    async fn increment_usage(&self, user_id: &str, category: &str) -> Result<i64, DatabaseError> {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts
            .entry((user_id.to_string(), category.to_string()))
            .or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}

// ---------------------------------------------------------------------------
// Payment store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPayments {
    rows: Mutex<Vec<PaymentRecord>>,
}

impl MemoryPayments {
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn rows_for_key(&self, key: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.idempotency_key == key)
            .count()
    }

    pub fn status_of(&self, reference: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.reference == reference)
            .map(|r| r.status.clone())
    }

    /// Rewind a row's deadline so the sweeper sees it as overdue.
    pub fn backdate(&self, reference: &str, expires_at: DateTime<Utc>) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.reference == reference) {
            row.expires_at = expires_at;
        }
    }

    fn unique_violation(constraint: &str) -> DatabaseError {
        DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some(constraint.to_string()),
        })
    }
}

#[async_trait]
impl PaymentStore for MemoryPayments {
    async fn create(&self, new: NewPayment) -> Result<PaymentRecord, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.idempotency_key == new.idempotency_key) {
            return Err(Self::unique_violation("payments_idempotency_key_key"));
        }
        if rows.iter().any(|r| r.reference == new.reference) {
            return Err(Self::unique_violation("payments_reference_key"));
        }

        let now = Utc::now();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            reference: new.reference,
            idempotency_key: new.idempotency_key,
            user_id: new.user_id,
            user_phone: new.user_phone,
            service_category: new.service_category,
            amount: new.amount,
            currency: new.currency,
            provider: new.provider.as_str().to_string(),
            provider_tx_id: None,
            signature: new.signature,
            status: new.status.as_db_status().to_string(),
            expires_at: new.expires_at,
            confirmed_at: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn get_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.reference == reference)
            .cloned())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.idempotency_key == key)
            .cloned())
    }

    async fn mark_awaiting_verification(
        &self,
        reference: &str,
        provider_tx_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.reference == reference && r.status == "PENDING")
        else {
            return Ok(None);
        };
        row.status = "AWAITING_VERIFICATION".to_string();
        row.provider_tx_id = Some(provider_tx_id.to_string());
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn confirm(
        &self,
        reference: &str,
        provider_tx_id: Option<&str>,
        confirmed_at: DateTime<Utc>,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| {
            r.reference == reference
                && (r.status == "PENDING" || r.status == "AWAITING_VERIFICATION")
        }) else {
            return Ok(None);
        };
        row.status = "SUCCESS".to_string();
        row.confirmed_at = Some(confirmed_at);
        if let Some(tx_id) = provider_tx_id {
            row.provider_tx_id = Some(tx_id.to_string());
        }
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn expire(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.reference == reference && r.status == "PENDING")
        else {
            return Ok(None);
        };
        row.status = "FAILED".to_string();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn cancel(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| {
            r.reference == reference
                && (r.status == "PENDING" || r.status == "AWAITING_VERIFICATION")
        }) else {
            return Ok(None);
        };
        row.status = "CANCELLED".to_string();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn refund(&self, reference: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.reference == reference && r.status == "SUCCESS")
        else {
            return Ok(None);
        };
        row.status = "REFUNDED".to_string();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let mut expired = 0u64;
        for row in rows
            .iter_mut()
            .filter(|r| r.status == "PENDING" && r.expires_at < now)
        {
            row.status = "FAILED".to_string();
            row.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }

    async fn find_reconcilable(&self, limit: i64) -> Result<Vec<PaymentRecord>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                (r.status == "PENDING" || r.status == "AWAITING_VERIFICATION")
                    && r.provider_tx_id.is_some()
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        filter: PaymentListFilter,
    ) -> Result<(i64, Vec<PaymentRecord>), DatabaseError> {
        let rows = self.rows.lock().unwrap();
        let matching: Vec<PaymentRecord> = rows
            .iter()
            .filter(|r| {
                filter
                    .status
                    .map_or(true, |s| r.status == s.as_db_status())
                    && filter.provider.map_or(true, |p| r.provider == p.as_str())
            })
            .cloned()
            .collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((total, page))
    }
}

// ---------------------------------------------------------------------------
// Room provisioner fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRooms {
    pub fail_next: AtomicBool,
    counter: AtomicU64,
}

impl MemoryRooms {
    pub fn provisioned(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomProvisioner for MemoryRooms {
    async fn create_room(
        &self,
        kind: RoomKind,
        _caller_id: &str,
        _recipient_id: &str,
    ) -> Result<String, RoomError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RoomError::Provisioning("upstream unavailable".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}-room-{}", kind.as_str(), n))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub usage: Arc<MemoryUsage>,
    pub payments: Arc<MemoryPayments>,
    pub rooms: Arc<MemoryRooms>,
    pub orchestrator: ServiceOrchestrator,
    pub confirmation: ConfirmationService,
    pub billing: BillingConfig,
}

pub fn harness() -> Harness {
    let billing = BillingConfig::default();
    let usage = Arc::new(MemoryUsage::default());
    let payments = Arc::new(MemoryPayments::default());
    let rooms = Arc::new(MemoryRooms::default());

    let orchestrator = ServiceOrchestrator::new(
        usage.clone(),
        payments.clone(),
        rooms.clone(),
        billing.clone(),
    );
    let confirmation = ConfirmationService::new(payments.clone(), billing.clone());

    Harness {
        usage,
        payments,
        rooms,
        orchestrator,
        confirmation,
        billing,
    }
}

pub fn xaf(amount: i64) -> BigDecimal {
    BigDecimal::from(amount)
}

pub fn is_status(record_status: &str, status: PaymentStatus) -> bool {
    record_status == status.as_db_status()
}
