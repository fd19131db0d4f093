//! Storage seam used by the idempotency guard and the execution mediator.

use crate::error::StoreError;
use crate::models::{
    BusinessKey, Category, CounterName, InvoiceLinkDraft, LedgerLineDraft, MovementDraft,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;

/// A movement already in the store that answers a business key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingMovement {
    pub folio: i64,
    pub date: NaiveDate,
    pub reconciled: bool,
}

/// Read access plus the entry point to transactional writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Closest movement (by date, then lowest folio) answering `key` within
    /// `window_days` of its date, skipping the folios in `exclude`.
    async fn find_movement(
        &self,
        key: &BusinessKey,
        window_days: u32,
        exclude: &[i64],
    ) -> Result<Option<ExistingMovement>, AppError>;

    /// Last value handed out by `counter`. Does not reserve anything.
    async fn current_counter(&self, counter: CounterName) -> Result<i64, AppError>;

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;
}

/// One atomic unit. Nothing is visible to other readers until `commit`;
/// dropping or rolling back discards every staged change, including counter
/// reservations.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_movement(
        &mut self,
        key: &BusinessKey,
        window_days: u32,
    ) -> Result<Option<ExistingMovement>, StoreError>;

    /// Advance `counter` and return the new value.
    async fn reserve_next(&mut self, counter: CounterName) -> Result<i64, StoreError>;

    async fn insert_movement(&mut self, folio: i64, draft: &MovementDraft)
        -> Result<(), StoreError>;

    async fn link_invoice(&mut self, folio: i64, link: &InvoiceLinkDraft)
        -> Result<(), StoreError>;

    /// Insert a ledger line and record `entry` on the owning movement.
    async fn insert_ledger_line(
        &mut self,
        entry: i64,
        folio: i64,
        line: &LedgerLineDraft,
    ) -> Result<(), StoreError>;

    async fn set_reconciled(&mut self, folio: i64) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Whether a stored movement answers `key`. Shared by every backend that
/// filters in memory.
pub fn key_matches(
    key: &BusinessKey,
    window_days: u32,
    account: &str,
    date: NaiveDate,
    category: Category,
    amount: Decimal,
    concept: &str,
) -> bool {
    account == key.account
        && category == key.category
        && amount == key.amount
        && key.concept.as_deref().map_or(true, |c| c == concept)
        && (date - key.date).num_days().unsigned_abs() <= u64::from(window_days)
}
