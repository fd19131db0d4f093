//! PostgreSQL adapter for the ledger store.

use crate::error::StoreError;
use crate::models::{
    BusinessKey, CounterName, InvoiceLinkDraft, LedgerLineDraft, MovementDraft,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{ExistingMovement, LedgerStore, UnitOfWork};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument};

const FIND_MOVEMENT: &str = r#"
    SELECT folio, movement_date, reconciled
    FROM bank_movements
    WHERE account = $1
      AND category = $2
      AND amount = $3
      AND ($4::text IS NULL OR concept = $4)
      AND movement_date BETWEEN $5 AND $6
      AND NOT (folio = ANY($8))
    ORDER BY abs(movement_date - $7::date), folio
    LIMIT 1
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ledger-sync-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(StdDuration::from_secs(30))
            .idle_timeout(StdDuration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn find_query<'q>(
    key: &'q BusinessKey,
    window_days: u32,
    exclude: &'q [i64],
) -> sqlx::query::QueryAs<'q, Postgres, (i64, NaiveDate, bool), sqlx::postgres::PgArguments> {
    let window = Duration::days(i64::from(window_days));
    sqlx::query_as::<_, (i64, NaiveDate, bool)>(FIND_MOVEMENT)
        .bind(&key.account)
        .bind(key.category.as_str())
        .bind(key.amount)
        .bind(key.concept.as_deref())
        .bind(key.date - window)
        .bind(key.date + window)
        .bind(key.date)
        .bind(exclude)
}

fn existing((folio, date, reconciled): (i64, NaiveDate, bool)) -> ExistingMovement {
    ExistingMovement {
        folio,
        date,
        reconciled,
    }
}

fn db_error(action: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(AppError::DatabaseError(anyhow::anyhow!(
        "Failed to {}: {}",
        action,
        e
    )))
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn find_movement(
        &self,
        key: &BusinessKey,
        window_days: u32,
        exclude: &[i64],
    ) -> Result<Option<ExistingMovement>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_movement"])
            .start_timer();

        let row = find_query(key, window_days, exclude)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find movement: {}", e)))?;

        timer.observe_duration();
        Ok(row.map(existing))
    }

    async fn current_counter(&self, counter: CounterName) -> Result<i64, AppError> {
        let value = sqlx::query_scalar::<_, i64>(
            "SELECT value FROM sequence_counters WHERE name = $1",
        )
        .bind(counter.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to read counter: {}", e)))?;

        Ok(value.unwrap_or(0))
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(PgUnit { tx }))
    }
}

/// One Postgres transaction. Counter rows stay locked by their
/// `UPDATE ... RETURNING` until the transaction ends.
struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn find_movement(
        &mut self,
        key: &BusinessKey,
        window_days: u32,
    ) -> Result<Option<ExistingMovement>, StoreError> {
        // Serialize concurrent runs planning the same key
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("lock business key", e))?;

        let row = find_query(key, window_days, &[])
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("re-check business key", e))?;
        Ok(row.map(existing))
    }

    async fn reserve_next(&mut self, counter: CounterName) -> Result<i64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reserve_next"])
            .start_timer();

        let value = sqlx::query_scalar::<_, i64>(
            "UPDATE sequence_counters SET value = value + 1 WHERE name = $1 RETURNING value",
        )
        .bind(counter.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("reserve counter", e))?
        .ok_or_else(|| {
            StoreError::Backend(AppError::NotFound(anyhow::anyhow!(
                "Counter {} is not provisioned",
                counter
            )))
        })?;

        timer.observe_duration();
        debug!(counter = %counter, value = value, "Counter reserved");
        Ok(value)
    }

    async fn insert_movement(
        &mut self,
        folio: i64,
        draft: &MovementDraft,
    ) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_movement"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO bank_movements (folio, account, movement_date, category, direction, kind, amount, concept, class, payment_form)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(folio)
        .bind(&draft.account)
        .bind(draft.date)
        .bind(draft.category.as_str())
        .bind(draft.direction.as_str())
        .bind(draft.kind.code())
        .bind(draft.amount)
        .bind(&draft.concept)
        .bind(&draft.class)
        .bind(draft.payment_form.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::SequenceCollision {
                    counter: CounterName::MovementFolio,
                    value: folio,
                }
            }
            _ => db_error("insert movement", e),
        })?;

        timer.observe_duration();
        Ok(())
    }

    async fn link_invoice(
        &mut self,
        folio: i64,
        link: &InvoiceLinkDraft,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO movement_invoices (folio, invoice_id, kind, applied, invoice_total)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(folio)
        .bind(&link.invoice_id)
        .bind(link.kind.as_str())
        .bind(link.applied)
        .bind(link.invoice_total)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                StoreError::MovementNotFound(folio)
            }
            _ => db_error("link invoice", e),
        })?;
        Ok(())
    }

    async fn insert_ledger_line(
        &mut self,
        entry: i64,
        folio: i64,
        line: &LedgerLineDraft,
    ) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_ledger_line"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO ledger_lines (entry_number, line_number, folio, entry_type, account, subaccount, direction, amount, concept)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry)
        .bind(i32::from(line.line_number))
        .bind(folio)
        .bind(line.entry_type.as_str())
        .bind(&line.account.account)
        .bind(&line.account.subaccount)
        .bind(line.direction.as_str())
        .bind(line.amount)
        .bind(&line.concept)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::SequenceCollision {
                    counter: CounterName::LedgerEntry,
                    value: entry,
                }
            }
            _ => db_error("insert ledger line", e),
        })?;

        let updated = sqlx::query("UPDATE bank_movements SET ledger_entry = $1 WHERE folio = $2")
            .bind(entry)
            .bind(folio)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("attach ledger entry", e))?;

        timer.observe_duration();
        if updated.rows_affected() == 0 {
            return Err(StoreError::MovementNotFound(folio));
        }
        Ok(())
    }

    async fn set_reconciled(&mut self, folio: i64) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE bank_movements SET reconciled = TRUE WHERE folio = $1")
            .bind(folio)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("mark reconciled", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::MovementNotFound(folio));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| db_error("commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("roll back transaction", e))
    }
}
