pub mod analysis;
pub mod cds;
pub mod fhir;
pub mod health;
pub mod metrics;

use axum::{
    Router,
    routing::{get, post},
};

use crate::error::AppError;
use crate::state::AppState;

/// JSON 405 for known paths hit with the wrong method
async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// CDS Hooks discovery and services
pub fn cds_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cds-services",
            get(cds::discovery).fallback(method_not_allowed),
        )
        .route(
            "/cds-services/{id}",
            post(cds::invoke).fallback(method_not_allowed),
        )
}

/// Dashboard API
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/analyze",
            post(analysis::analyze).fallback(method_not_allowed),
        )
        .route(
            "/analyze/batch",
            post(analysis::analyze_batch).fallback(method_not_allowed),
        )
        .route(
            "/insights",
            post(analysis::combine).fallback(method_not_allowed),
        )
        .route(
            "/patients/{id}/insights",
            post(analysis::patient_insights).fallback(method_not_allowed),
        )
        .route(
            "/predict",
            get(analysis::predict).fallback(method_not_allowed),
        )
        .route(
            "/document-content",
            post(fhir::document_content).fallback(method_not_allowed),
        )
        .route(
            "/last-analyzed",
            post(fhir::last_analyzed).fallback(method_not_allowed),
        )
        .route(
            "/fhir/{resource_type}",
            get(fhir::fetch).fallback(method_not_allowed),
        )
}
