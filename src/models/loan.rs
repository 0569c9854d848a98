//! Loan model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::error::AppError;

/// Loan lifecycle status (stored as SMALLINT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LoanStatus {
    Requested = 1,
    CheckedOut = 2,
    Returned = 3,
    Cancelled = 4,
    Overdue = 5,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 5] = [
        LoanStatus::Requested,
        LoanStatus::CheckedOut,
        LoanStatus::Returned,
        LoanStatus::Cancelled,
        LoanStatus::Overdue,
    ];

    /// Statuses that count against book capacity and member limits
    pub const ACTIVE: [LoanStatus; 3] = [
        LoanStatus::Requested,
        LoanStatus::CheckedOut,
        LoanStatus::Overdue,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Requested => "requested",
            LoanStatus::CheckedOut => "checked_out",
            LoanStatus::Returned => "returned",
            LoanStatus::Cancelled => "cancelled",
            LoanStatus::Overdue => "overdue",
        }
    }
}

impl TryFrom<i16> for LoanStatus {
    type Error = AppError;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(LoanStatus::Requested),
            2 => Ok(LoanStatus::CheckedOut),
            3 => Ok(LoanStatus::Returned),
            4 => Ok(LoanStatus::Cancelled),
            5 => Ok(LoanStatus::Overdue),
            other => Err(AppError::Internal(format!("Unknown loan status code {}", other))),
        }
    }
}

impl From<LoanStatus> for i16 {
    fn from(s: LoanStatus) -> Self {
        s as i16
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loan record. Never deleted; returned and cancelled loans are kept as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    pub status: LoanStatus,
    pub requested_at: DateTime<Utc>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub expected_return_at: Option<DateTime<Utc>>,
    pub checked_out_by: Option<i32>,
    pub received_by: Option<i32>,
}

/// Raw loan row from database
#[derive(Debug, FromRow)]
pub struct LoanRow {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    pub status: i16,
    pub requested_at: DateTime<Utc>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub expected_return_at: Option<DateTime<Utc>>,
    pub checked_out_by: Option<i32>,
    pub received_by: Option<i32>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = AppError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: row.id,
            book_id: row.book_id,
            borrower_id: row.borrower_id,
            status: LoanStatus::try_from(row.status)?,
            requested_at: row.requested_at,
            checked_out_at: row.checked_out_at,
            returned_at: row.returned_at,
            expected_return_at: row.expected_return_at,
            checked_out_by: row.checked_out_by,
            received_by: row.received_by,
        })
    }
}

/// Insert payload for a freshly requested loan.
///
/// Only built from a `BorrowAuthorization`, see `lending::state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub book_id: i32,
    pub borrower_id: i32,
    pub requested_at: DateTime<Utc>,
}

/// Loan with its read-time display status
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoanDetails {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    /// Stored status
    pub status: LoanStatus,
    /// Status as displayed: a checked-out loan past its expected return is `overdue`
    pub display_status: LoanStatus,
    pub requested_at: DateTime<Utc>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub expected_return_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub checked_out_by: Option<i32>,
    pub received_by: Option<i32>,
    pub is_overdue: bool,
}
