//! Book (catalog title) model and availability view

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Catalog book as seen by the lending engine.
///
/// `total_copies` is owned by catalog management; lending only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub total_copies: i32,
    pub is_active: bool,
}

/// Derived copy availability for a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Availability {
    pub book_id: i32,
    pub total_copies: i32,
    pub active_loans: i64,
    pub available_copies: i64,
}
