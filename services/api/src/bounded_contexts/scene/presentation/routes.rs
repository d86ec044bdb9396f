use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::shared::infrastructure::app_state::AppState;

use super::controllers;

pub fn scene_routes() -> Router<AppState> {
    Router::new()
        .route("/alliances", post(controllers::create_alliance))
        .route("/alliances/:id", get(controllers::get_alliance))
        .route("/alliances/:id", patch(controllers::update_alliance))
        .route("/alliances/:id", delete(controllers::delete_alliance))
        .route("/trust/:scene_id", get(controllers::get_trust))
}
