//! Settings endpoints

use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{error::AppResult, models::LendingSettings};

use super::AuthenticatedMember;

/// Update settings request; omitted fields keep their value
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateSettingsRequest {
    /// Maximum simultaneous active loans per member
    #[validate(range(min = 0, max = 1000))]
    pub max_active_loans: Option<i32>,
    /// Loan duration in days
    #[validate(range(min = 1, max = 365))]
    pub loan_duration_days: Option<i32>,
}

/// Get current lending settings
#[utoipa::path(
    get,
    path = "/settings",
    tag = "settings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current settings", body = LendingSettings)
    )
)]
pub async fn get_settings(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
) -> AppResult<Json<LendingSettings>> {
    claims.require_staff()?;

    let settings = state.services.settings.get_settings().await?;
    Ok(Json(settings))
}

/// Update lending settings
#[utoipa::path(
    put,
    path = "/settings",
    tag = "settings",
    security(("bearer_auth" = [])),
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings updated", body = LendingSettings),
        (status = 400, description = "Value out of range"),
        (status = 403, description = "Insufficient permissions")
    )
)]
pub async fn update_settings(
    State(state): State<crate::AppState>,
    AuthenticatedMember(claims): AuthenticatedMember,
    Json(request): Json<UpdateSettingsRequest>,
) -> AppResult<Json<LendingSettings>> {
    claims.require_admin()?;

    let settings = state.services.settings.update_settings(request).await?;
    Ok(Json(settings))
}
