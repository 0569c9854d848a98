//! In-process record store.
//!
//! A single async mutex serializes every transaction, and writes are staged
//! on a copy of the state that only replaces the shared state on commit.
//! This gives serializable semantics inside one process; it does not
//! coordinate several server instances.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{Book, Loan, LoanStatus, NewLoan},
};

use super::{LendingTransaction, RecordStore, SettingsProvider, TxMode};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    loans: BTreeMap<i32, Loan>,
    settings: HashMap<String, i32>,
    last_book_id: i32,
    last_loan_id: i32,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a catalog book and return its id
    pub async fn add_book(&self, title: &str, total_copies: i32) -> i32 {
        let mut state = self.state.lock().await;
        state.last_book_id += 1;
        let id = state.last_book_id;
        state.books.insert(
            id,
            Book {
                id,
                title: title.to_string(),
                total_copies,
                is_active: true,
            },
        );
        id
    }

    /// Flag a book inactive, as catalog management does on withdrawal
    pub async fn deactivate_book(&self, book_id: i32) {
        if let Some(book) = self.state.lock().await.books.get_mut(&book_id) {
            book.is_active = false;
        }
    }

    /// Insert a loan row as-is, bypassing the lending rules (history import, fixtures)
    pub async fn import_loan(&self, mut loan: Loan) -> i32 {
        let mut state = self.state.lock().await;
        state.last_loan_id += 1;
        loan.id = state.last_loan_id;
        let id = loan.id;
        state.loans.insert(id, loan);
        id
    }

    /// All loans, in id order
    pub async fn loans(&self) -> Vec<Loan> {
        self.state.lock().await.loans.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn LendingTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            mode,
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    mode: TxMode,
}

impl MemoryTransaction {
    fn ensure_writable(&self) -> AppResult<()> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(AppError::Internal(
                "Write attempted in a read-only transaction".to_string(),
            )),
        }
    }

    fn active_loans(&self) -> impl Iterator<Item = &Loan> {
        self.staged.loans.values().filter(|l| l.status.is_active())
    }
}

#[async_trait]
impl SettingsProvider for MemoryTransaction {
    async fn setting(&mut self, name: &str) -> AppResult<Option<i32>> {
        Ok(self.staged.settings.get(name).copied())
    }

    async fn put_setting(&mut self, name: &str, value: i32) -> AppResult<()> {
        self.ensure_writable()?;
        self.staged.settings.insert(name.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl LendingTransaction for MemoryTransaction {
    async fn find_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        Ok(self.staged.books.get(&book_id).cloned())
    }

    async fn lock_borrower(&mut self, _borrower_id: i32) -> AppResult<()> {
        // already exclusive
        Ok(())
    }

    async fn find_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        Ok(self.staged.loans.get(&loan_id).cloned())
    }

    async fn count_active_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        Ok(self.active_loans().filter(|l| l.book_id == book_id).count() as i64)
    }

    async fn count_active_for_borrower(&mut self, borrower_id: i32) -> AppResult<i64> {
        Ok(self
            .active_loans()
            .filter(|l| l.borrower_id == borrower_id)
            .count() as i64)
    }

    async fn has_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<bool> {
        Ok(self
            .active_loans()
            .any(|l| l.book_id == book_id && l.borrower_id == borrower_id))
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan> {
        self.ensure_writable()?;
        self.staged.last_loan_id += 1;
        let loan = Loan {
            id: self.staged.last_loan_id,
            book_id: loan.book_id,
            borrower_id: loan.borrower_id,
            status: LoanStatus::Requested,
            requested_at: loan.requested_at,
            checked_out_at: None,
            returned_at: None,
            expected_return_at: None,
            checked_out_by: None,
            received_by: None,
        };
        self.staged.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        self.ensure_writable()?;
        match self.staged.loans.get_mut(&loan.id) {
            Some(stored) => {
                *stored = loan.clone();
                Ok(())
            }
            None => Err(AppError::Internal(format!("Loan {} update affected 0 rows", loan.id))),
        }
    }

    async fn borrower_loans(&mut self, borrower_id: i32, active_only: bool) -> AppResult<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .staged
            .loans
            .values()
            .filter(|l| l.borrower_id == borrower_id)
            .filter(|l| !active_only || l.status.is_active())
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        Ok(loans)
    }

    async fn count_active(&mut self) -> AppResult<i64> {
        Ok(self.active_loans().count() as i64)
    }

    async fn count_overdue(&mut self, now: DateTime<Utc>) -> AppResult<i64> {
        Ok(self
            .staged
            .loans
            .values()
            .filter(|l| match l.status {
                LoanStatus::Overdue => true,
                LoanStatus::CheckedOut => l.expected_return_at.map(|d| d < now).unwrap_or(false),
                _ => false,
            })
            .count() as i64)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let book_id = store.add_book("Dune", 1).await;

        let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
        tx.insert_loan(NewLoan {
            book_id,
            borrower_id: 1,
            requested_at: Utc::now(),
        })
        .await
        .unwrap();
        assert_eq!(tx.count_active_for_book(book_id).await.unwrap(), 1);
        drop(tx);

        assert!(store.loans().await.is_empty());
    }

    #[tokio::test]
    async fn test_committed_writes_are_visible() {
        let store = MemoryStore::new();
        let book_id = store.add_book("Dune", 1).await;

        let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
        let loan = tx
            .insert_loan(NewLoan {
                book_id,
                borrower_id: 1,
                requested_at: Utc::now(),
            })
            .await
            .unwrap();
        tx.put_setting("max_active_loans", 3).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(TxMode::ReadOnly).await.unwrap();
        assert_eq!(tx.find_loan(loan.id).await.unwrap(), Some(loan));
        assert_eq!(tx.setting("max_active_loans").await.unwrap(), Some(3));
        assert!(tx.has_active_loan(book_id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_only_transaction_rejects_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin(TxMode::ReadOnly).await.unwrap();
        let err = tx.put_setting("max_active_loans", 3).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
