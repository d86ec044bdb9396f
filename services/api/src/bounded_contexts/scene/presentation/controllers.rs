use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::app_state::AppState;
use crate::shared::infrastructure::auth::AuthUser;

use crate::bounded_contexts::scene::application::dto::{
    CreateAllianceRequest, UpdateAllianceRequest,
};

pub async fn create_alliance(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateAllianceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.alliance_service.create(&user.did, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_alliance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.alliance_service.get(id).await?;
    Ok(Json(response))
}

pub async fn update_alliance(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateAllianceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.alliance_service.update(&user.did, id, request).await?;
    Ok(Json(response))
}

pub async fn delete_alliance(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.alliance_service.delete(&user.did, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_trust(
    State(state): State<AppState>,
    Path(scene_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.trust_service.read(scene_id).await?;
    Ok(Json(response))
}
