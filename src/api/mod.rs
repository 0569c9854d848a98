//! API handlers for the circulation REST endpoints

pub mod books;
pub mod health;
pub mod loans;
pub mod openapi;
pub mod settings;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    RequestPartsExt, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, models::MemberClaims, AppState};

/// Extractor for the authenticated member from a bearer JWT
pub struct AuthenticatedMember(pub MemberClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedMember {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Authentication("Missing or invalid authorization header".to_string()))?;

        let claims = MemberClaims::from_token(bearer.token(), &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedMember(claims))
    }
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Catalog availability
        .route("/books/:id/availability", get(books::get_availability))
        // Loans
        .route("/loans", post(loans::create_loan))
        .route("/loans/:id", get(loans::get_loan))
        .route("/loans/:id/checkout", post(loans::check_out_loan))
        .route("/loans/:id/return", post(loans::return_loan))
        .route("/members/:id/loans", get(loans::get_member_loans))
        // Settings
        .route("/settings", get(settings::get_settings).put(settings::update_settings))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi::create_openapi_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
