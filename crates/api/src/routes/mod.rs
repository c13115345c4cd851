//! Route definitions

pub mod callbacks;
pub mod checkout;
pub mod health;
pub mod invoices;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health checks
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Billing
        .route("/billing/checkout", post(checkout::create_checkout))
        .route("/billing/callback", post(callbacks::gateway_callback))
        // Invoices
        .route("/stores/:store_id/invoices", get(invoices::list_invoices))
        .route("/invoices/:invoice_number", get(invoices::get_invoice))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
