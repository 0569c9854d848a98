//! PostgreSQL record store.
//!
//! Read-write transactions run at READ COMMITTED and take `FOR UPDATE` locks
//! on the book or loan row they decide on, plus a transaction-scoped advisory
//! lock per borrower. Every statement after a lock wait gets a fresh
//! snapshot, so the counts taken behind the book lock include the loans of
//! the transaction that held it. Deadlocks and collisions on the active loan
//! index are reported as `AppError::TransactionConflict` and replayed by the
//! service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::LoanRow,
        Book, Loan, LoanStatus, NewLoan,
    },
};

use super::{LendingTransaction, RecordStore, SettingsProvider, TxMode};

/// Advisory lock namespace for borrower-scoped locks
const BORROWER_LOCK_NAMESPACE: i32 = 0x4c4f;

const LOAN_COLUMNS: &str = "id, book_id, borrower_id, status, requested_at, checked_out_at, \
     returned_at, expected_return_at, checked_out_by, received_by";

fn active_codes() -> Vec<i16> {
    LoanStatus::ACTIVE.iter().map(|s| i16::from(*s)).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn LendingTransaction>> {
        let mut tx = self.pool.begin().await?;

        let statement = match mode {
            TxMode::ReadWrite => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            TxMode::ReadOnly => "SET TRANSACTION READ ONLY",
        };
        sqlx::query(statement).execute(&mut *tx).await?;

        Ok(Box::new(PgTransaction { tx, mode }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    mode: TxMode,
}

impl PgTransaction {
    /// Row lock clause; PostgreSQL rejects `FOR UPDATE` in read-only transactions
    fn lock_clause(&self) -> &'static str {
        match self.mode {
            TxMode::ReadWrite => "FOR UPDATE",
            TxMode::ReadOnly => "",
        }
    }
}

#[async_trait]
impl SettingsProvider for PgTransaction {
    async fn setting(&mut self, name: &str) -> AppResult<Option<i32>> {
        let value = sqlx::query_scalar::<_, i32>("SELECT value FROM lending_settings WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(value)
    }

    async fn put_setting(&mut self, name: &str, value: i32) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lending_settings (name, value)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LendingTransaction for PgTransaction {
    async fn find_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "SELECT id, title, total_copies, is_active FROM books WHERE id = $1 {}",
            self.lock_clause()
        ))
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(book)
    }

    async fn lock_borrower(&mut self, borrower_id: i32) -> AppResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(BORROWER_LOCK_NAMESPACE)
            .bind(borrower_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            "SELECT {} FROM loans WHERE id = $1 {}",
            LOAN_COLUMNS,
            self.lock_clause()
        ))
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn count_active_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status = ANY($2)",
        )
        .bind(book_id)
        .bind(active_codes())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn count_active_for_borrower(&mut self, borrower_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE borrower_id = $1 AND status = ANY($2)",
        )
        .bind(borrower_id)
        .bind(active_codes())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn has_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM loans
                WHERE book_id = $1 AND borrower_id = $2 AND status = ANY($3)
            )
            "#,
        )
        .bind(book_id)
        .bind(borrower_id)
        .bind(active_codes())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            INSERT INTO loans (book_id, borrower_id, status, requested_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.book_id)
        .bind(loan.borrower_id)
        .bind(i16::from(LoanStatus::Requested))
        .bind(loan.requested_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Loan::try_from(row)
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE loans SET
                status = $2, checked_out_at = $3, returned_at = $4,
                expected_return_at = $5, checked_out_by = $6, received_by = $7
            WHERE id = $1
            "#,
        )
        .bind(loan.id)
        .bind(i16::from(loan.status))
        .bind(loan.checked_out_at)
        .bind(loan.returned_at)
        .bind(loan.expected_return_at)
        .bind(loan.checked_out_by)
        .bind(loan.received_by)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows_affected != 1 {
            return Err(AppError::Internal(format!(
                "Loan {} update affected {} rows",
                loan.id, rows_affected
            )));
        }
        Ok(())
    }

    async fn borrower_loans(&mut self, borrower_id: i32, active_only: bool) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            SELECT {} FROM loans
            WHERE borrower_id = $1 AND (NOT $2 OR status = ANY($3))
            ORDER BY requested_at DESC, id DESC
            "#,
            LOAN_COLUMNS
        ))
        .bind(borrower_id)
        .bind(active_only)
        .bind(active_codes())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(Loan::try_from).collect()
    }

    async fn count_active(&mut self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE status = ANY($1)")
            .bind(active_codes())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn count_overdue(&mut self, now: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM loans
            WHERE status = $1 OR (status = $2 AND expected_return_at < $3)
            "#,
        )
        .bind(i16::from(LoanStatus::Overdue))
        .bind(i16::from(LoanStatus::CheckedOut))
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
