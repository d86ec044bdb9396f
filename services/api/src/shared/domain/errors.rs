use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Alliance weight must be between 0.0 and 1.0")]
    InvalidWeight,

    #[error("A scene cannot ally with itself")]
    SelfAlliance,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Scene not found")]
    SceneNotFound,

    #[error("Alliance has been deleted")]
    AllianceDeleted,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Participant is already active in this session")]
    AlreadyActive,

    #[error("Invalid payment state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Payment intent id does not match the recorded intent")]
    PaymentIntentMismatch,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Idempotency-Key header is required")]
    MissingIdempotencyKey,

    #[error("Idempotency-Key must be at most 64 characters")]
    IdempotencyKeyTooLong,

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl AppError {
    /// snake_case code used in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::InvalidWeight => "invalid_weight",
            AppError::SelfAlliance => "self_alliance",
            AppError::AuthFailed(_) => "auth_failed",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::SceneNotFound => "scene_not_found",
            AppError::AllianceDeleted => "alliance_deleted",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Conflict(_)
            | AppError::AlreadyActive
            | AppError::InvalidTransition { .. }
            | AppError::PaymentIntentMismatch => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::MissingIdempotencyKey => "missing_idempotency_key",
            AppError::IdempotencyKeyTooLong => "idempotency_key_too_long",
            AppError::ExternalService(_)
            | AppError::Integrity(_)
            | AppError::Database(_)
            | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InvalidWeight
            | AppError::SelfAlliance
            | AppError::BadRequest(_)
            | AppError::MissingIdempotencyKey
            | AppError::IdempotencyKeyTooLong => StatusCode::BAD_REQUEST,
            AppError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::SceneNotFound | AppError::AllianceDeleted => {
                StatusCode::NOT_FOUND
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Conflict(_)
            | AppError::AlreadyActive
            | AppError::InvalidTransition { .. }
            | AppError::PaymentIntentMismatch => StatusCode::CONFLICT,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Integrity(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details never leave the process.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            AppError::Integrity(e) => {
                tracing::error!(error = %e, "integrity violation");
                "internal error".to_string()
            }
            AppError::ExternalService(e) => {
                tracing::warn!(error = %e, "external service error");
                "upstream service unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": ErrorBody {
                code: self.code(),
                message,
            }
        }));

        if let AppError::RateLimited { retry_after_secs } = &self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}
