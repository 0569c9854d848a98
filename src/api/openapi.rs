//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, health, loans, settings};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Circulation API",
        version = "1.0.0",
        description = "Library lending and copy availability REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::get_availability,
        // Loans
        loans::create_loan,
        loans::get_loan,
        loans::check_out_loan,
        loans::return_loan,
        loans::get_member_loans,
        // Settings
        settings::get_settings,
        settings::update_settings,
    ),
    components(
        schemas(
            // Books
            crate::models::book::Book,
            crate::models::book::Availability,
            // Loans
            loans::CreateLoanRequest,
            crate::models::loan::Loan,
            crate::models::loan::LoanStatus,
            crate::models::loan::LoanDetails,
            // Settings
            crate::models::setting::LendingSettings,
            settings::UpdateSettingsRequest,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Copy availability"),
        (name = "loans", description = "Loan lifecycle"),
        (name = "settings", description = "Lending settings")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
