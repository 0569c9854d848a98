//! Lending service: the transaction boundary of the loan workflow.
//!
//! `borrow`, `check_out` and `return_loan` are the only operations that
//! mutate loans. Each one runs validation and the write inside a single
//! read-write transaction; a transaction conflict reported by the store is
//! replayed (once by default) before being turned into the business error a
//! losing racer would have seen.

use std::future::Future;

use chrono::Utc;

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult, LendingError},
    lending::{ledger, policy},
    models::{Availability, LendingSettings, Loan, LoanDetails, NewLoan},
    repository::{Repository, TxMode},
};

#[derive(Clone)]
pub struct LendingService {
    repository: Repository,
    config: LendingConfig,
}

impl LendingService {
    pub fn new(repository: Repository, config: LendingConfig) -> Self {
        Self { repository, config }
    }

    /// Request a loan of `book_id` for `borrower_id`
    pub async fn borrow(&self, book_id: i32, borrower_id: i32) -> AppResult<Loan> {
        self.with_retry(
            "borrow",
            move || self.try_borrow(book_id, borrower_id),
            || {
                LendingError::Unavailable(format!(
                    "Book {} could not be reserved because of concurrent loans",
                    book_id
                ))
            },
        )
        .await
    }

    /// Hand a requested loan over to its borrower
    pub async fn check_out(&self, loan_id: i32, staff_id: i32) -> AppResult<Loan> {
        self.with_retry(
            "check_out",
            move || self.try_check_out(loan_id, staff_id),
            || LendingError::InvalidTransition(format!("Loan {} was modified concurrently", loan_id)),
        )
        .await
    }

    /// Receive a checked-out loan back
    pub async fn return_loan(&self, loan_id: i32, staff_id: i32) -> AppResult<Loan> {
        self.with_retry(
            "return_loan",
            move || self.try_return(loan_id, staff_id),
            || LendingError::InvalidTransition(format!("Loan {} was modified concurrently", loan_id)),
        )
        .await
    }

    async fn try_borrow(&self, book_id: i32, borrower_id: i32) -> AppResult<Loan> {
        let mut tx = self.repository.begin(TxMode::ReadWrite).await?;

        let authorization = match policy::authorize(tx.as_mut(), book_id, borrower_id, &self.config).await {
            Ok(authorization) => authorization,
            Err(AppError::Lending(refusal)) => {
                tracing::debug!("Borrow of book {} by member {} refused: {}", book_id, borrower_id, refusal);
                return Err(refusal.into());
            }
            Err(e) => return Err(e),
        };

        let loan = tx.insert_loan(NewLoan::requested(authorization, Utc::now())).await?;
        tx.commit().await?;

        tracing::info!("Loan {} requested: book {} for member {}", loan.id, book_id, borrower_id);
        Ok(loan)
    }

    async fn try_check_out(&self, loan_id: i32, staff_id: i32) -> AppResult<Loan> {
        let mut tx = self.repository.begin(TxMode::ReadWrite).await?;

        let mut loan = tx
            .find_loan(loan_id)
            .await?
            .ok_or_else(|| LendingError::NotFound(format!("Loan with id {} not found", loan_id)))?;
        let settings = LendingSettings::read(tx.as_mut(), &self.config).await?;

        loan.check_out(staff_id, Utc::now(), settings.loan_duration())?;
        tx.update_loan(&loan).await?;
        tx.commit().await?;

        tracing::info!("Loan {} checked out by staff {}", loan.id, staff_id);
        Ok(loan)
    }

    async fn try_return(&self, loan_id: i32, staff_id: i32) -> AppResult<Loan> {
        let mut tx = self.repository.begin(TxMode::ReadWrite).await?;

        let mut loan = tx
            .find_loan(loan_id)
            .await?
            .ok_or_else(|| LendingError::NotFound(format!("Loan with id {} not found", loan_id)))?;

        loan.return_to(staff_id, Utc::now())?;
        tx.update_loan(&loan).await?;
        tx.commit().await?;

        tracing::info!("Loan {} returned to staff {}", loan.id, staff_id);
        Ok(loan)
    }

    /// Replays `attempt` after transient conflicts, up to `conflict_retries` times
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut attempt: F,
        exhausted: impl FnOnce() -> LendingError,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() => {
                    if retries >= self.config.conflict_retries {
                        tracing::warn!("{}: giving up after {} retries: {}", operation, retries, e);
                        return Err(exhausted().into());
                    }
                    retries += 1;
                    tracing::warn!("{}: transaction conflict, retrying ({}): {}", operation, retries, e);
                }
                result => return result,
            }
        }
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Get a loan with its display status
    pub async fn get_loan(&self, loan_id: i32) -> AppResult<LoanDetails> {
        let mut tx = self.repository.begin(TxMode::ReadOnly).await?;
        let loan = tx
            .find_loan(loan_id)
            .await?
            .ok_or_else(|| LendingError::NotFound(format!("Loan with id {} not found", loan_id)))?;
        Ok(loan.details(Utc::now()))
    }

    /// Loan history of a member, most recent first
    pub async fn borrower_loans(&self, borrower_id: i32, active_only: bool) -> AppResult<Vec<LoanDetails>> {
        let mut tx = self.repository.begin(TxMode::ReadOnly).await?;
        let now = Utc::now();
        Ok(tx
            .borrower_loans(borrower_id, active_only)
            .await?
            .iter()
            .map(|loan| loan.details(now))
            .collect())
    }

    /// Current availability of a book; advisory only, borrow re-checks it
    pub async fn availability(&self, book_id: i32) -> AppResult<Availability> {
        let mut tx = self.repository.begin(TxMode::ReadOnly).await?;
        let book = match tx.find_book(book_id).await? {
            Some(book) if book.is_active => book,
            _ => return Err(LendingError::NotFound(format!("Book with id {} not found", book_id)).into()),
        };
        ledger::availability(tx.as_mut(), &book).await
    }

    /// Open and drop a read-only transaction to confirm the store is reachable
    pub async fn check_store(&self) -> AppResult<()> {
        self.repository.begin(TxMode::ReadOnly).await?;
        Ok(())
    }

    /// Count active loans
    pub async fn count_active(&self) -> AppResult<i64> {
        let mut tx = self.repository.begin(TxMode::ReadOnly).await?;
        tx.count_active().await
    }

    /// Count overdue loans
    pub async fn count_overdue(&self) -> AppResult<i64> {
        let mut tx = self.repository.begin(TxMode::ReadOnly).await?;
        tx.count_overdue(Utc::now()).await
    }
}
