//! In-process ledger store for offline planning and tests.

use crate::error::StoreError;
use crate::models::{
    BusinessKey, Category, CounterName, Direction, EntryType, InvoiceKind, InvoiceLinkDraft,
    LedgerAccount, LedgerLineDraft, MovementDraft, MovementKind, PaymentForm,
};
use crate::services::store::{key_matches, ExistingMovement, LedgerStore, UnitOfWork};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMovement {
    pub folio: i64,
    pub account: String,
    pub date: NaiveDate,
    pub category: Category,
    pub direction: Direction,
    pub kind: MovementKind,
    pub amount: Decimal,
    pub concept: String,
    pub class: String,
    pub payment_form: PaymentForm,
    pub reconciled: bool,
    pub ledger_entry: Option<i64>,
}

impl StoredMovement {
    fn from_draft(folio: i64, draft: &MovementDraft) -> Self {
        Self {
            folio,
            account: draft.account.clone(),
            date: draft.date,
            category: draft.category,
            direction: draft.direction,
            kind: draft.kind,
            amount: draft.amount,
            concept: draft.concept.clone(),
            class: draft.class.clone(),
            payment_form: draft.payment_form,
            reconciled: false,
            ledger_entry: None,
        }
    }

    /// A hand-captured record, as an operator would leave it before any sync.
    pub fn manual(
        folio: i64,
        account: &str,
        date: NaiveDate,
        category: Category,
        amount: Decimal,
        concept: &str,
    ) -> Self {
        Self {
            folio,
            account: account.to_string(),
            date,
            category,
            direction: Direction::Debit,
            kind: MovementKind::ManualExpense,
            amount,
            concept: concept.to_string(),
            class: "MANUAL".to_string(),
            payment_form: PaymentForm::Transfer,
            reconciled: false,
            ledger_entry: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredInvoiceLink {
    pub folio: i64,
    pub invoice_id: String,
    pub kind: InvoiceKind,
    pub applied: Decimal,
    pub invoice_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredLedgerLine {
    pub entry: i64,
    pub folio: i64,
    pub entry_type: EntryType,
    pub line_number: u16,
    pub account: LedgerAccount,
    pub direction: Direction,
    pub amount: Decimal,
    pub concept: String,
}

#[derive(Debug, Clone, Default)]
struct State {
    movements: BTreeMap<i64, StoredMovement>,
    links: Vec<StoredInvoiceLink>,
    ledger: Vec<StoredLedgerLine>,
    counters: HashMap<CounterName, i64>,
}

impl State {
    fn find(&self, key: &BusinessKey, window_days: u32, exclude: &[i64]) -> Option<ExistingMovement> {
        self.movements
            .values()
            .filter(|m| !exclude.contains(&m.folio))
            .filter(|m| {
                key_matches(
                    key,
                    window_days,
                    &m.account,
                    m.date,
                    m.category,
                    m.amount,
                    &m.concept,
                )
            })
            .min_by_key(|m| ((m.date - key.date).num_days().abs(), m.folio))
            .map(|m| ExistingMovement {
                folio: m.folio,
                date: m.date,
                reconciled: m.reconciled,
            })
    }

    fn counter(&self, counter: CounterName) -> i64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }
}

/// Store kept behind one async mutex. A unit of work owns the lock until it
/// commits or rolls back, so units are serialized.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counters at the given values (the last values handed out).
    pub fn with_counters(movement_folio: i64, ledger_entry: i64) -> Self {
        let mut state = State::default();
        state.counters.insert(CounterName::MovementFolio, movement_folio);
        state.counters.insert(CounterName::LedgerEntry, ledger_entry);
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Insert a record directly. Counters are left untouched, so seeding a
    /// folio ahead of the counter sets up a collision.
    pub async fn seed_movement(&self, movement: StoredMovement) {
        self.state
            .lock()
            .await
            .movements
            .insert(movement.folio, movement);
    }

    pub async fn set_counter(&self, counter: CounterName, value: i64) {
        self.state.lock().await.counters.insert(counter, value);
    }

    pub async fn counter(&self, counter: CounterName) -> i64 {
        self.state.lock().await.counter(counter)
    }

    pub async fn movements(&self) -> Vec<StoredMovement> {
        self.state.lock().await.movements.values().cloned().collect()
    }

    pub async fn movement(&self, folio: i64) -> Option<StoredMovement> {
        self.state.lock().await.movements.get(&folio).cloned()
    }

    pub async fn invoice_links(&self) -> Vec<StoredInvoiceLink> {
        self.state.lock().await.links.clone()
    }

    pub async fn ledger_lines(&self) -> Vec<StoredLedgerLine> {
        self.state.lock().await.ledger.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn find_movement(
        &self,
        key: &BusinessKey,
        window_days: u32,
        exclude: &[i64],
    ) -> Result<Option<ExistingMovement>, AppError> {
        Ok(self.state.lock().await.find(key, window_days, exclude))
    }

    async fn current_counter(&self, counter: CounterName) -> Result<i64, AppError> {
        Ok(self.state.lock().await.counter(counter))
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnit { guard, staged }))
    }
}

/// Works on a copy of the state; commit swaps it in.
struct MemoryUnit {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn find_movement(
        &mut self,
        key: &BusinessKey,
        window_days: u32,
    ) -> Result<Option<ExistingMovement>, StoreError> {
        Ok(self.staged.find(key, window_days, &[]))
    }

    async fn reserve_next(&mut self, counter: CounterName) -> Result<i64, StoreError> {
        let value = self.staged.counters.entry(counter).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn insert_movement(
        &mut self,
        folio: i64,
        draft: &MovementDraft,
    ) -> Result<(), StoreError> {
        if self.staged.movements.contains_key(&folio) {
            return Err(StoreError::SequenceCollision {
                counter: CounterName::MovementFolio,
                value: folio,
            });
        }
        self.staged
            .movements
            .insert(folio, StoredMovement::from_draft(folio, draft));
        Ok(())
    }

    async fn link_invoice(
        &mut self,
        folio: i64,
        link: &InvoiceLinkDraft,
    ) -> Result<(), StoreError> {
        if !self.staged.movements.contains_key(&folio) {
            return Err(StoreError::MovementNotFound(folio));
        }
        self.staged.links.push(StoredInvoiceLink {
            folio,
            invoice_id: link.invoice_id.clone(),
            kind: link.kind,
            applied: link.applied,
            invoice_total: link.invoice_total,
        });
        Ok(())
    }

    async fn insert_ledger_line(
        &mut self,
        entry: i64,
        folio: i64,
        line: &LedgerLineDraft,
    ) -> Result<(), StoreError> {
        let taken = self
            .staged
            .ledger
            .iter()
            .any(|l| l.entry == entry && l.line_number == line.line_number && l.folio != folio);
        if taken {
            return Err(StoreError::SequenceCollision {
                counter: CounterName::LedgerEntry,
                value: entry,
            });
        }
        let movement = self
            .staged
            .movements
            .get_mut(&folio)
            .ok_or(StoreError::MovementNotFound(folio))?;
        movement.ledger_entry = Some(entry);
        self.staged.ledger.push(StoredLedgerLine {
            entry,
            folio,
            entry_type: line.entry_type,
            line_number: line.line_number,
            account: line.account.clone(),
            direction: line.direction,
            amount: line.amount,
            concept: line.concept.clone(),
        });
        Ok(())
    }

    async fn set_reconciled(&mut self, folio: i64) -> Result<(), StoreError> {
        let movement = self
            .staged
            .movements
            .get_mut(&folio)
            .ok_or(StoreError::MovementNotFound(folio))?;
        movement.reconciled = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnit { mut guard, staged } = *self;
        debug!(
            movements = staged.movements.len(),
            ledger_lines = staged.ledger.len(),
            "Committing in-memory unit"
        );
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
