use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::app_state::AppState;
use crate::shared::infrastructure::auth::AuthUser;

use crate::bounded_contexts::payment::application::dto::{
    CheckoutRequest, OnboardRequest, StatusQuery,
};

pub async fn onboard(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<OnboardRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.payment_service.onboard(&user.did, request).await?;
    Ok(Json(response))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::MissingIdempotencyKey)?;

    let (status, response) = state
        .payment_service
        .create_checkout(&user.did, key, request)
        .await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::CREATED);
    Ok((status, Json(response)))
}

pub async fn get_status(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let response = state
        .payment_service
        .status(&user.did, &query.session_id)
        .await?;
    Ok(Json(response))
}

/// Provider webhook: authenticated purely by signature over the raw body.
/// Processing errors still answer 200 so the provider does not storm us with
/// retries; redelivery happens naturally because the event id is unrecorded.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing signature header".to_string()))?;

    // An unverifiable delivery is the one 400 on this route; everything past
    // the signature check resolves to 200.
    state
        .payment_service
        .handle_webhook(&body, signature)
        .await
        .map_err(|e| match e {
            AppError::AuthFailed(msg) => AppError::BadRequest(msg),
            other => other,
        })?;
    Ok(StatusCode::OK)
}
