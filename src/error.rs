//! Error types for the circulation server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes returned in error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    ItemNotAvailable = 5,
    DuplicateLoan = 6,
    MaxBorrowsReached = 7,
    InvalidTransition = 8,
    BadValue = 9,
}

/// Business outcomes of the lending workflow.
///
/// These are expected results a caller can act on, not defects. They are
/// produced by the policy validator and the loan state machine and passed
/// through the lending service unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate active loan: {0}")]
    DuplicateActiveLoan(String),

    #[error("Loan limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl LendingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LendingError::NotFound(_) => ErrorCode::NoSuchData,
            LendingError::Unavailable(_) => ErrorCode::ItemNotAvailable,
            LendingError::DuplicateActiveLoan(_) => ErrorCode::DuplicateLoan,
            LendingError::LimitExceeded(_) => ErrorCode::MaxBorrowsReached,
            LendingError::InvalidTransition(_) => ErrorCode::InvalidTransition,
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Lending(#[from] LendingError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization failure or deadlock reported by the store; safe to retry.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransactionConflict(_))
    }
}

/// Partial unique index over active (book, borrower) loans
pub const ACTIVE_LOAN_INDEX: &str = "uq_loans_book_borrower_active";

/// SQLSTATEs a replay can resolve: 40001 serialization_failure,
/// 40P01 deadlock_detected, and 23505 unique_violation on the active loan index
fn is_conflict(code: &str, constraint: Option<&str>) -> bool {
    match code {
        "40001" | "40P01" => true,
        "23505" => constraint == Some(ACTIVE_LOAN_INDEX),
        _ => false,
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        let transient = e
            .as_database_error()
            .and_then(|db| db.code().map(|code| is_conflict(&code, db.constraint())))
            .unwrap_or(false);

        if transient {
            AppError::TransactionConflict(e.to_string())
        } else {
            AppError::Database(e)
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Lending(e) => {
                let status = match e {
                    LendingError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::CONFLICT,
                };
                (status, e.code(), e.to_string())
            }
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::TransactionConflict(msg) => {
                tracing::warn!("Unresolved transaction conflict: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorCode::DbFailure,
                    "Concurrent update, please retry".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
