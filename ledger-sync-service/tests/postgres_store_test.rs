//! Postgres store integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p ledger-sync-service -- --ignored

mod common;

use common::{d, day, init_tracing, mixed_statement, reconciler, reconciling, CASH};
use ledger_sync_service::engine::{Approval, RunMode};
use ledger_sync_service::models::{
    BusinessKey, Category, CounterName, GroupDisposition, LineStatus, ReasonCode,
};
use ledger_sync_service::services::{Database, LedgerStore};
use rust_decimal::Decimal;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

/// Connect, migrate and wipe every table, leaving the counters at the given values.
async fn fresh_database(movement_folio: i64, ledger_entry: i64) -> Database {
    init_tracing();
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let db = Database::new(&url, 2, 1).await.expect("Failed to connect");
    db.run_migrations().await.expect("Failed to migrate");

    sqlx::query("TRUNCATE ledger_lines, movement_invoices, bank_movements")
        .execute(db.pool())
        .await
        .expect("Failed to truncate");
    for (name, value) in [("movement_folio", movement_folio), ("ledger_entry", ledger_entry)] {
        sqlx::query("UPDATE sequence_counters SET value = $2 WHERE name = $1")
            .bind(name)
            .bind(value)
            .execute(db.pool())
            .await
            .expect("Failed to reset counter");
    }
    db
}

async fn seed_manual(db: &Database, folio: i64, category: Category, amount: Decimal) {
    sqlx::query(
        r#"
        INSERT INTO bank_movements (folio, account, movement_date, category, direction, kind, amount, concept, class, payment_form)
        VALUES ($1, $2, $3, $4, 'debit', 2, $5, 'CAPTURA MANUAL', 'MANUAL', 'transfer')
        "#,
    )
    .bind(folio)
    .bind(CASH)
    .bind(day(10))
    .bind(category.as_str())
    .bind(amount)
    .execute(db.pool())
    .await
    .expect("Failed to seed movement");
}

async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db.pool())
        .await
        .expect("Failed to count rows")
}

fn commit_mode() -> RunMode {
    RunMode::Commit(Approval::confirmed_by("controller"))
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn commit_writes_and_rerun_is_noop() {
    let db = fresh_database(1000, 300).await;
    seed_manual(&db, 40, Category::SupplierPayment, d("6000.00")).await;
    let engine = reconciler(reconciling());

    let first = engine
        .run(mixed_statement(), &commit_mode(), &db, &CancellationToken::new())
        .await
        .expect("commit run");
    assert_eq!(first.summary.executed, 5);
    assert_eq!(count(&db, "bank_movements").await, 6);
    assert_eq!(db.current_counter(CounterName::MovementFolio).await.unwrap(), 1005);
    assert_eq!(db.current_counter(CounterName::LedgerEntry).await.unwrap(), 304);

    let reconciled: bool = sqlx::query_scalar("SELECT reconciled FROM bank_movements WHERE folio = 40")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert!(reconciled);

    let unbalanced: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM (
            SELECT entry_number
            FROM ledger_lines
            GROUP BY entry_number
            HAVING SUM(CASE WHEN direction = 'debit' THEN amount ELSE -amount END) <> 0
        ) t
        "#,
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(unbalanced, 0);

    let ledger_rows = count(&db, "ledger_lines").await;
    let second = engine
        .run(mixed_statement(), &commit_mode(), &db, &CancellationToken::new())
        .await
        .expect("rerun");
    assert_eq!(second.summary.executed, 0);
    assert_eq!(second.summary.already_present, 5);
    assert_eq!(count(&db, "bank_movements").await, 6);
    assert_eq!(count(&db, "ledger_lines").await, ledger_rows);
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn occupied_folio_fails_group_without_overwrite() {
    let db = fresh_database(1000, 300).await;
    seed_manual(&db, 40, Category::SupplierPayment, d("6000.00")).await;
    seed_manual(&db, 1001, Category::Payroll, d("85000.00")).await;

    let report = reconciler(reconciling())
        .run(mixed_statement(), &commit_mode(), &db, &CancellationToken::new())
        .await
        .expect("commit run");

    assert!(matches!(
        report.groups[0].disposition,
        GroupDisposition::Failed {
            reason: ReasonCode::SequenceCollision,
            ..
        }
    ));
    assert_eq!(report.line(1).unwrap().status, LineStatus::Failed);
    assert_eq!(report.line(9).unwrap().status, LineStatus::Executed);

    let category: String = sqlx::query_scalar("SELECT category FROM bank_movements WHERE folio = 1001")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(category, Category::Payroll.as_str());
    assert_eq!(count(&db, "ledger_lines").await, 0);
    assert_eq!(db.current_counter(CounterName::MovementFolio).await.unwrap(), 1000);
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn reconciliation_lookup_honours_window() {
    let db = fresh_database(0, 0).await;
    seed_manual(&db, 7, Category::SupplierPayment, d("6000.00")).await;

    let key = BusinessKey {
        account: CASH.to_string(),
        date: day(11),
        category: Category::SupplierPayment,
        amount: d("6000.00"),
        concept: None,
    };
    assert!(db.find_movement(&key, 0, &[]).await.unwrap().is_none());
    let found = db.find_movement(&key, 1, &[]).await.unwrap().expect("within window");
    assert_eq!(found.folio, 7);
    assert_eq!(found.date, day(10));
    assert!(!found.reconciled);
    assert!(db.find_movement(&key, 1, &[7]).await.unwrap().is_none());
}
