//! Book availability endpoint

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::Availability};

use super::AuthenticatedMember;

/// Get the current availability of a book
#[utoipa::path(
    get,
    path = "/books/{id}/availability",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Copies currently available", body = Availability),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_availability(
    State(state): State<crate::AppState>,
    AuthenticatedMember(_claims): AuthenticatedMember,
    Path(book_id): Path<i32>,
) -> AppResult<Json<Availability>> {
    let availability = state.services.lending.availability(book_id).await?;
    Ok(Json(availability))
}
