use axum::{
    routing::{get, post},
    Router,
};

use crate::shared::infrastructure::app_state::AppState;

use super::controllers;

pub fn stream_routes() -> Router<AppState> {
    Router::new()
        .route("/streams/:id/join", post(controllers::join_stream))
        .route("/streams/:id/leave", post(controllers::leave_stream))
        .route("/streams/:id/participants", get(controllers::get_participants))
        .route("/streams/:id/participants/ws", get(controllers::subscribe_events))
        .route("/streams/:id/analytics", get(controllers::get_analytics))
}
