//! Common test utilities for ledger-sync-service integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use ledger_sync_service::config::EngineSettings;
use ledger_sync_service::engine::{Reconciler, RunInput};
use ledger_sync_service::error::StoreError;
use ledger_sync_service::models::{
    BusinessKey, Channel, CounterName, InvoiceLinkDraft, Invoice, LedgerLineDraft, MovementDraft,
    PeriodTarget, StatementLine,
};
use ledger_sync_service::services::{ExistingMovement, InMemoryStore, LedgerStore, UnitOfWork};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Once;

static INIT: Once = Once::new();

pub const CASH: &str = "055003730017";
pub const CARD: &str = "038900320016";
pub const EXPENSES: &str = "055003730157";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ledger_sync_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal literal")
}

pub fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, n).expect("valid March date")
}

pub fn line(line_no: u32, account: &str, date: NaiveDate, description: &str, amount: &str) -> StatementLine {
    StatementLine::new(line_no, account, date, description, d(amount))
}

/// Target whose global invoice covers the whole amount.
pub fn target(date: NaiveDate, channel: Channel, total: &str) -> PeriodTarget {
    PeriodTarget {
        date,
        channel,
        expected_total: d(total),
        global_invoice: Invoice::new(format!("FD-{}", date.format("%d%m")), d(total))
            .with_taxes((d(total) * d("0.16") / d("1.16")).round_dp(2), Decimal::ZERO),
        individual_invoices: Vec::new(),
    }
}

pub fn reconciler(settings: EngineSettings) -> Reconciler {
    Reconciler::new(settings).expect("standard rule set compiles")
}

/// Settings that reconcile matching store records which are still open.
pub fn reconciling() -> EngineSettings {
    EngineSettings {
        reconcile_open_records: true,
        ..EngineSettings::default()
    }
}

/// Fifteen card deposits of Monday 9 March that settle the weekend cutoffs.
pub fn weekend_card_batch() -> RunInput {
    let amounts = [
        "80000.00", "60250.50", "55111.11", "40100.06", "28100.50", "90000.00", "75300.30",
        "65211.21", "50050.05", "35050.05", "110000.00", "95000.00", "82345.67", "56789.01",
        "29361.08",
    ];
    let lines = amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| line(i as u32 + 1, CARD, day(9), "ABONO VENTAS TDC", amount))
        .collect();
    RunInput {
        lines,
        targets: vec![
            target(day(6), Channel::Card, "263562.17"),
            target(day(7), Channel::Card, "315611.61"),
            target(day(8), Channel::Card, "373293.87"),
        ],
        ..RunInput::default()
    }
}

/// A day with every kind of line the engine handles.
pub fn mixed_statement() -> RunInput {
    let mut cash_target = target(day(9), Channel::Cash, "3480.00");
    cash_target.individual_invoices = vec![
        Invoice::new("A-101", d("1160.00")).with_taxes(d("160.00"), Decimal::ZERO),
        Invoice::new("A-102", d("320.00")).with_taxes(d("40.00"), d("20.00")),
    ];
    cash_target.global_invoice = Invoice::new("FD-0903", d("2000.00")).with_taxes(d("275.86"), Decimal::ZERO);

    RunInput {
        lines: vec![
            line(1, CARD, day(10), "ABONO VENTAS TDC", "7000.00"),
            line(2, CARD, day(10), "ABONO VENTAS TDD", "4600.00"),
            line(3, CASH, day(10), "DEPOSITO EN EFECTIVO", "3480.00"),
            line(4, CASH, day(10), "COMISION TRANSFERENCIA SPEI", "-6.00"),
            line(5, CASH, day(10), "IVA DE COMISION TRANSFERENCIA SPEI", "-0.96"),
            line(6, CASH, day(10), "(BE) Traspaso a cuenta: 055003730157", "-25000.00"),
            line(7, EXPENSES, day(10), "(NB) Recepción de cuenta: 055003730017", "25000.00"),
            line(8, CASH, day(10), "NOMINA QUINCENAL PAGO DE NOMINA", "-85000.00"),
            line(9, CASH, day(10), "PROV00981 PAGO SPEI", "-6000.00"),
            line(10, CASH, day(10), "CARGO NO IDENTIFICADO", "-12.00"),
        ],
        targets: vec![target(day(9), Channel::Card, "11600.00"), cash_target],
        ..RunInput::default()
    }
}

// ============================================================================
// Failure injection
// ============================================================================

/// Wraps the in-memory store and fails ledger-line inserts for movements on
/// one account, after the movement itself was written.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    failing_account: String,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore, failing_account: &str) -> Self {
        Self {
            inner,
            failing_account: failing_account.to_string(),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn find_movement(
        &self,
        key: &BusinessKey,
        window_days: u32,
        exclude: &[i64],
    ) -> Result<Option<ExistingMovement>, AppError> {
        self.inner.find_movement(key, window_days, exclude).await
    }

    async fn current_counter(&self, counter: CounterName) -> Result<i64, AppError> {
        self.inner.current_counter(counter).await
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        Ok(Box::new(FlakyUnit {
            inner: self.inner.begin().await?,
            failing_account: self.failing_account.clone(),
            accounts: HashMap::new(),
        }))
    }
}

struct FlakyUnit {
    inner: Box<dyn UnitOfWork>,
    failing_account: String,
    accounts: HashMap<i64, String>,
}

#[async_trait]
impl UnitOfWork for FlakyUnit {
    async fn find_movement(
        &mut self,
        key: &BusinessKey,
        window_days: u32,
    ) -> Result<Option<ExistingMovement>, StoreError> {
        self.inner.find_movement(key, window_days).await
    }

    async fn reserve_next(&mut self, counter: CounterName) -> Result<i64, StoreError> {
        self.inner.reserve_next(counter).await
    }

    async fn insert_movement(&mut self, folio: i64, draft: &MovementDraft) -> Result<(), StoreError> {
        self.accounts.insert(folio, draft.account.clone());
        self.inner.insert_movement(folio, draft).await
    }

    async fn link_invoice(&mut self, folio: i64, link: &InvoiceLinkDraft) -> Result<(), StoreError> {
        self.inner.link_invoice(folio, link).await
    }

    async fn insert_ledger_line(
        &mut self,
        entry: i64,
        folio: i64,
        line: &LedgerLineDraft,
    ) -> Result<(), StoreError> {
        if self.accounts.get(&folio) == Some(&self.failing_account) && line.line_number == 3 {
            return Err(StoreError::Backend(AppError::DatabaseError(anyhow::anyhow!(
                "connection reset by peer"
            ))));
        }
        self.inner.insert_ledger_line(entry, folio, line).await
    }

    async fn set_reconciled(&mut self, folio: i64) -> Result<(), StoreError> {
        self.inner.set_reconciled(folio).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
