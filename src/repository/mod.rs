//! Record store layer.
//!
//! The lending service never talks to a connection directly: every read and
//! write happens inside a [`LendingTransaction`] obtained from a
//! [`RecordStore`]. A read-write transaction must isolate its reads from
//! concurrent borrow, check-out and return operations touching the same book
//! or the same borrower, so the validation it performs still holds when it
//! commits.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{Book, Loan, NewLoan},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Transaction flavour requested from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Row locks on what is read for update; reads after a lock see its holder's writes
    ReadWrite,
    /// Advisory reads; never used to make a decision that is written back
    ReadOnly,
}

/// Named integer settings, readable inside the borrow transaction
#[async_trait]
pub trait SettingsProvider: Send {
    async fn setting(&mut self, name: &str) -> AppResult<Option<i32>>;

    async fn put_setting(&mut self, name: &str, value: i32) -> AppResult<()>;
}

/// One open unit of work against the record store.
///
/// Dropping a transaction without calling [`LendingTransaction::commit`]
/// discards its writes.
#[async_trait]
pub trait LendingTransaction: SettingsProvider + Send {
    /// Read a book; in a read-write transaction it stays locked until the end
    async fn find_book(&mut self, book_id: i32) -> AppResult<Option<Book>>;

    /// Serialize with other transactions touching this borrower's active loans
    async fn lock_borrower(&mut self, borrower_id: i32) -> AppResult<()>;

    /// Read a loan; in a read-write transaction it stays locked until the end
    async fn find_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>>;

    async fn count_active_for_book(&mut self, book_id: i32) -> AppResult<i64>;

    async fn count_active_for_borrower(&mut self, borrower_id: i32) -> AppResult<i64>;

    async fn has_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<bool>;

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan>;

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()>;

    /// Loans of a borrower, most recent request first
    async fn borrower_loans(&mut self, borrower_id: i32, active_only: bool) -> AppResult<Vec<Loan>>;

    async fn count_active(&mut self) -> AppResult<i64>;

    /// Checked-out loans whose expected return is before `now`
    async fn count_overdue(&mut self, now: DateTime<Utc>) -> AppResult<i64>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn LendingTransaction>>;
}

/// Main repository handle shared by the services
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn RecordStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Repository backed by PostgreSQL
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::new(Arc::new(PgStore::new(pool)))
    }

    /// Repository backed by an in-process store
    pub fn memory(store: MemoryStore) -> Self {
        Self::new(Arc::new(store))
    }

    pub async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn LendingTransaction>> {
        self.store.begin(mode).await
    }
}
