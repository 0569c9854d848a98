//! Loan state machine.
//!
//! ```text
//! borrow ──> Requested ──check out──> CheckedOut ──return──> Returned
//!               │                      Overdue ────return──┘
//!               └──cancel──> Cancelled
//! ```
//!
//! Only `(Requested, CheckOut)` and `(CheckedOut | Overdue, Return)` are
//! legal; every other pair is refused with `InvalidTransition` and leaves the
//! loan untouched.

use chrono::{DateTime, Duration, Utc};

use crate::{
    error::LendingError,
    models::{Loan, LoanDetails, LoanStatus, NewLoan},
};

use super::policy::BorrowAuthorization;

/// Staff-driven loan transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CheckOut,
    Return,
}

impl Transition {
    pub const ALL: [Transition; 2] = [Transition::CheckOut, Transition::Return];

    /// Status reached by applying `self` to a loan in `from`
    pub fn target(self, from: LoanStatus) -> Result<LoanStatus, LendingError> {
        match (self, from) {
            (Transition::CheckOut, LoanStatus::Requested) => Ok(LoanStatus::CheckedOut),
            (Transition::Return, LoanStatus::CheckedOut | LoanStatus::Overdue) => {
                Ok(LoanStatus::Returned)
            }
            (Transition::CheckOut, from) => Err(LendingError::InvalidTransition(format!(
                "cannot check out a loan that is {}",
                from
            ))),
            (Transition::Return, LoanStatus::Requested) => Err(LendingError::InvalidTransition(
                "a requested loan has not been checked out and cannot be returned".to_string(),
            )),
            (Transition::Return, from) => Err(LendingError::InvalidTransition(format!(
                "cannot return a loan that is {}",
                from
            ))),
        }
    }
}

impl NewLoan {
    /// The only way to create a loan: from a policy authorization
    pub fn requested(authorization: BorrowAuthorization, now: DateTime<Utc>) -> Self {
        Self {
            book_id: authorization.book_id(),
            borrower_id: authorization.borrower_id(),
            requested_at: now,
        }
    }
}

impl Loan {
    /// `Requested -> CheckedOut`; sets the check-out time, the staff member and
    /// the expected return date.
    pub fn check_out(
        &mut self,
        staff_id: i32,
        now: DateTime<Utc>,
        loan_duration: Duration,
    ) -> Result<(), LendingError> {
        self.status = Transition::CheckOut.target(self.status)?;
        self.checked_out_at = Some(now);
        self.checked_out_by = Some(staff_id);
        self.expected_return_at = Some(now + loan_duration);
        Ok(())
    }

    /// `CheckedOut | Overdue -> Returned`; sets the return time and the receiving staff member.
    pub fn return_to(&mut self, staff_id: i32, now: DateTime<Utc>) -> Result<(), LendingError> {
        self.status = Transition::Return.target(self.status)?;
        self.returned_at = Some(now);
        self.received_by = Some(staff_id);
        Ok(())
    }

    pub fn display_status(&self, now: DateTime<Utc>) -> LoanStatus {
        classify(self.status, self.expected_return_at, now)
    }

    pub fn details(&self, now: DateTime<Utc>) -> LoanDetails {
        let display_status = self.display_status(now);
        LoanDetails {
            id: self.id,
            book_id: self.book_id,
            borrower_id: self.borrower_id,
            status: self.status,
            display_status,
            requested_at: self.requested_at,
            checked_out_at: self.checked_out_at,
            expected_return_at: self.expected_return_at,
            returned_at: self.returned_at,
            checked_out_by: self.checked_out_by,
            received_by: self.received_by,
            is_overdue: display_status == LoanStatus::Overdue,
        }
    }
}

/// Read-time status: a checked-out loan past its expected return shows as overdue.
/// Nothing is written back.
pub fn classify(
    status: LoanStatus,
    expected_return_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> LoanStatus {
    match (status, expected_return_at) {
        (LoanStatus::CheckedOut, Some(due)) if due < now => LoanStatus::Overdue,
        (status, _) => status,
    }
}
