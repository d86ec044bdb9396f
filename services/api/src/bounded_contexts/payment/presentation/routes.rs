use axum::{
    routing::{get, post},
    Router,
};

use crate::shared::infrastructure::app_state::AppState;

use super::controllers;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/onboard", post(controllers::onboard))
        .route("/payments/checkout", post(controllers::create_checkout))
        .route("/payments/status", get(controllers::get_status))
        .route("/internal/stripe", post(controllers::stripe_webhook))
}
