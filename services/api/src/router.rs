use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId as RequestIdValue, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;

use crate::bounded_contexts::payment::presentation::routes::payment_routes;
use crate::bounded_contexts::scene::presentation::routes::scene_routes;
use crate::bounded_contexts::stream::presentation::routes::stream_routes;
use crate::shared::infrastructure::app_state::AppState;
use crate::shared::infrastructure::rate_limit::rate_limit_middleware;
use subcults_types::RequestId;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps every request that arrives without an `x-request-id`.
#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestIdValue> {
        HeaderValue::from_str(&RequestId::new().to_string())
            .ok()
            .map(RequestIdValue::new)
    }
}

pub fn build_router(state: AppState) -> Router {
    // Layer order, outermost first: panic recovery, request-id stamping,
    // tracing (span carries the id so error logs correlate), id propagation
    // into the response, then the rate limiter.
    Router::new()
        .merge(scene_routes())
        .merge(stream_routes())
        .merge(payment_routes())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": "subcults-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// Handler panics surface as the generic envelope, never a stack trace.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {"code": "internal_error", "message": "internal error"}
        })),
    )
        .into_response()
}
