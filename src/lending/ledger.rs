//! Inventory ledger.
//!
//! Availability is never stored: it is recomputed from the book's declared
//! copy count and the current active loans every time it is read.

use crate::{
    error::AppResult,
    models::{Availability, Book},
    repository::LendingTransaction,
};

/// Copies of `book` not held by an active loan, floored at zero
pub fn available_copies(book: &Book, active_loans: i64) -> i64 {
    (book.total_copies as i64 - active_loans).max(0)
}

/// Count active loans for `book` inside `tx` and derive its availability
pub async fn availability(tx: &mut dyn LendingTransaction, book: &Book) -> AppResult<Availability> {
    let active_loans = tx.count_active_for_book(book.id).await?;
    Ok(Availability {
        book_id: book.id,
        total_copies: book.total_copies,
        active_loans,
        available_copies: available_copies(book, active_loans),
    })
}
