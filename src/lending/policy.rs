//! Borrow policy validator.
//!
//! Checks run in a fixed order and stop at the first failure, each failure
//! carrying its own reason:
//!
//! 1. the book exists and is active (`NotFound`)
//! 2. a copy is available (`Unavailable`)
//! 3. the borrower holds no active loan for this book (`DuplicateActiveLoan`)
//! 4. the borrower is below `max_active_loans` (`LimitExceeded`)
//!
//! The validator only reads. It locks the book row and the borrower before
//! counting, so within a read-write transaction its answer still holds at
//! commit time.

use crate::{
    config::LendingConfig,
    error::{AppResult, LendingError},
    models::LendingSettings,
    repository::LendingTransaction,
};

use super::ledger;

/// Proof that a loan for (book, borrower) passed every policy check.
///
/// Only [`authorize`] can build one, and a new loan can only be built from one.
#[derive(Debug)]
pub struct BorrowAuthorization {
    book_id: i32,
    borrower_id: i32,
}

impl BorrowAuthorization {
    pub fn book_id(&self) -> i32 {
        self.book_id
    }

    pub fn borrower_id(&self) -> i32 {
        self.borrower_id
    }
}

/// Run the borrow checks against the state visible in `tx`
pub async fn authorize(
    tx: &mut dyn LendingTransaction,
    book_id: i32,
    borrower_id: i32,
    defaults: &LendingConfig,
) -> AppResult<BorrowAuthorization> {
    let book = match tx.find_book(book_id).await? {
        Some(book) if book.is_active => book,
        _ => {
            return Err(LendingError::NotFound(format!("Book with id {} not found", book_id)).into())
        }
    };

    tx.lock_borrower(borrower_id).await?;

    let availability = ledger::availability(&mut *tx, &book).await?;
    if availability.available_copies <= 0 {
        return Err(LendingError::Unavailable(format!(
            "All {} copies of book {} are on loan",
            book.total_copies, book_id
        ))
        .into());
    }

    if tx.has_active_loan(book_id, borrower_id).await? {
        return Err(LendingError::DuplicateActiveLoan(format!(
            "Member {} already has an active loan for book {}",
            borrower_id, book_id
        ))
        .into());
    }

    let settings = LendingSettings::read(&mut *tx, defaults).await?;
    let active_loans = tx.count_active_for_borrower(borrower_id).await?;
    if active_loans >= settings.max_active_loans as i64 {
        return Err(LendingError::LimitExceeded(format!(
            "Maximum loans reached ({}/{})",
            active_loans, settings.max_active_loans
        ))
        .into());
    }

    Ok(BorrowAuthorization {
        book_id,
        borrower_id,
    })
}
