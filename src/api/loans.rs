//! Loan management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::AppResult,
    models::{Loan, LoanDetails},
};

use super::AuthenticatedMember;

/// Borrow request
#[derive(Deserialize, ToSchema)]
pub struct CreateLoanRequest {
    /// Book to borrow
    pub book_id: i32,
    /// Member borrowing the book; defaults to the caller. Staff only when different.
    pub borrower_id: Option<i32>,
}

/// Loan history filter
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MemberLoansQuery {
    /// Only requested, checked-out and overdue loans
    pub active_only: Option<bool>,
}

/// Request a loan (borrow a book)
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = CreateLoanRequest,
    responses(
        (status = 201, description = "Loan requested", body = Loan),
        (status = 403, description = "Borrowing for another member requires staff"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "No copy available, duplicate active loan or loan limit reached")
    )
)]
pub async fn create_loan(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
    Json(request): Json<CreateLoanRequest>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    let borrower_id = request.borrower_id.unwrap_or(claims.member_id);
    if borrower_id != claims.member_id {
        claims.require_staff()?;
    }

    let loan = state.services.lending.borrow(request.book_id, borrower_id).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Get a loan
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.lending.get_loan(loan_id).await?;
    claims.require_self_or_staff(loan.borrower_id)?;
    Ok(Json(loan))
}

/// Check out a requested loan
#[utoipa::path(
    post,
    path = "/loans/{id}/checkout",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan checked out", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan is not in the requested state")
    )
)]
pub async fn check_out_loan(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    claims.require_staff()?;

    let loan = state.services.lending.check_out(loan_id, claims.member_id).await?;
    Ok(Json(loan))
}

/// Return a checked-out loan
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan returned", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan is not checked out")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    claims.require_staff()?;

    let loan = state.services.lending.return_loan(loan_id, claims.member_id).await?;
    Ok(Json(loan))
}

/// Get the loans of a member
#[utoipa::path(
    get,
    path = "/members/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Member ID"),
        MemberLoansQuery
    ),
    responses(
        (status = 200, description = "Member's loans, most recent first", body = Vec<LoanDetails>),
        (status = 403, description = "Another member's loans")
    )
)]
pub async fn get_member_loans(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
    Path(member_id): Path<i32>,
    Query(query): Query<MemberLoansQuery>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_self_or_staff(member_id)?;

    let loans = state
        .services
        .lending
        .borrower_loans(member_id, query.active_only.unwrap_or(false))
        .await?;
    Ok(Json(loans))
}
