//! Replay of lending operations after transaction conflicts

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use circulation_server::{
    config::LendingConfig,
    error::{AppError, AppResult, LendingError},
    models::{Book, Loan, LoanStatus, NewLoan},
    repository::{LendingTransaction, MemoryStore, RecordStore, Repository, SettingsProvider, TxMode},
    services::lending::LendingService,
};

/// Wraps the memory store and fails the next commits on demand
#[derive(Clone, Default)]
struct FlakyStore {
    inner: MemoryStore,
    conflicts: Arc<AtomicU32>,
    commits: Arc<AtomicU32>,
    broken: Arc<AtomicBool>,
}

impl FlakyStore {
    fn fail_next_commits(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn commit_attempts(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    fn service(&self, conflict_retries: u32) -> LendingService {
        LendingService::new(
            Repository::new(Arc::new(self.clone())),
            LendingConfig {
                conflict_retries,
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn LendingTransaction>> {
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin(mode).await?,
            store: self.clone(),
        }))
    }
}

struct FlakyTransaction {
    inner: Box<dyn LendingTransaction>,
    store: FlakyStore,
}

#[async_trait]
impl SettingsProvider for FlakyTransaction {
    async fn setting(&mut self, name: &str) -> AppResult<Option<i32>> {
        self.inner.setting(name).await
    }

    async fn put_setting(&mut self, name: &str, value: i32) -> AppResult<()> {
        self.inner.put_setting(name, value).await
    }
}

#[async_trait]
impl LendingTransaction for FlakyTransaction {
    async fn find_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        self.inner.find_book(book_id).await
    }

    async fn lock_borrower(&mut self, borrower_id: i32) -> AppResult<()> {
        self.inner.lock_borrower(borrower_id).await
    }

    async fn find_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        self.inner.find_loan(loan_id).await
    }

    async fn count_active_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        self.inner.count_active_for_book(book_id).await
    }

    async fn count_active_for_borrower(&mut self, borrower_id: i32) -> AppResult<i64> {
        self.inner.count_active_for_borrower(borrower_id).await
    }

    async fn has_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<bool> {
        self.inner.has_active_loan(book_id, borrower_id).await
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan> {
        self.inner.insert_loan(loan).await
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        self.inner.update_loan(loan).await
    }

    async fn borrower_loans(&mut self, borrower_id: i32, active_only: bool) -> AppResult<Vec<Loan>> {
        self.inner.borrower_loans(borrower_id, active_only).await
    }

    async fn count_active(&mut self) -> AppResult<i64> {
        self.inner.count_active().await
    }

    async fn count_overdue(&mut self, now: DateTime<Utc>) -> AppResult<i64> {
        self.inner.count_overdue(now).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.store.commits.fetch_add(1, Ordering::SeqCst);
        if self.store.broken.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        let conflicted = self
            .store
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            // the inner transaction is dropped, which discards its writes
            return Err(AppError::TransactionConflict("could not serialize access".to_string()));
        }
        self.inner.commit().await
    }
}

#[tokio::test]
async fn test_borrow_succeeds_after_one_conflict() {
    let store = FlakyStore::default();
    let book = store.inner.add_book("Les Chouans", 1).await;
    let service = store.service(1);

    store.fail_next_commits(1);
    let loan = service.borrow(book, 1).await.unwrap();

    assert_eq!(loan.status, LoanStatus::Requested);
    assert_eq!(store.commit_attempts(), 2);
    assert_eq!(store.inner.loans().await.len(), 1);
}

#[tokio::test]
async fn test_borrow_reports_unavailable_when_conflicts_persist() {
    let store = FlakyStore::default();
    let book = store.inner.add_book("Les Chouans", 1).await;
    let service = store.service(1);

    store.fail_next_commits(2);
    let err = service.borrow(book, 1).await.unwrap_err();

    assert!(matches!(err, AppError::Lending(LendingError::Unavailable(_))));
    assert_eq!(store.commit_attempts(), 2);
    assert!(store.inner.loans().await.is_empty());
}

#[tokio::test]
async fn test_no_replay_when_retries_disabled() {
    let store = FlakyStore::default();
    let book = store.inner.add_book("Les Chouans", 1).await;
    let service = store.service(0);

    store.fail_next_commits(1);
    let err = service.borrow(book, 1).await.unwrap_err();

    assert!(matches!(err, AppError::Lending(LendingError::Unavailable(_))));
    assert_eq!(store.commit_attempts(), 1);
}

#[tokio::test]
async fn test_transition_reports_invalid_when_conflicts_persist() {
    let store = FlakyStore::default();
    let book = store.inner.add_book("Eugénie Grandet", 1).await;
    let service = store.service(1);
    let loan = service.borrow(book, 1).await.unwrap();

    store.fail_next_commits(2);
    let err = service.check_out(loan.id, 900).await.unwrap_err();
    assert!(matches!(err, AppError::Lending(LendingError::InvalidTransition(_))));
    assert_eq!(service.get_loan(loan.id).await.unwrap().status, LoanStatus::Requested);

    store.fail_next_commits(1);
    let loan = service.check_out(loan.id, 900).await.unwrap();
    assert_eq!(loan.status, LoanStatus::CheckedOut);

    store.fail_next_commits(2);
    let err = service.return_loan(loan.id, 900).await.unwrap_err();
    assert!(matches!(err, AppError::Lending(LendingError::InvalidTransition(_))));
    assert_eq!(service.get_loan(loan.id).await.unwrap().status, LoanStatus::CheckedOut);
}

#[tokio::test]
async fn test_store_failures_are_not_replayed() {
    let store = FlakyStore::default();
    let book = store.inner.add_book("Le Père Goriot", 1).await;
    let service = store.service(3);

    store.break_connection();
    let err = service.borrow(book, 1).await.unwrap_err();

    assert!(matches!(err, AppError::Database(_)));
    assert_eq!(store.commit_attempts(), 1);
    assert!(store.inner.loans().await.is_empty());
}
