#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::Value;
use tower::ServiceExt;

use subcults_api::router::build_router;
use subcults_api::shared::infrastructure::app_state::{test_config, AppState, TestHandles};
use subcults_types::Did;

pub struct TestApp {
    pub state: AppState,
    pub handles: TestHandles,
}

pub fn spawn_app() -> TestApp {
    let (state, handles) = AppState::in_memory(&test_config());
    TestApp { state, handles }
}

impl TestApp {
    pub fn token_for(&self, did: &str) -> String {
        let did = Did::new(did).unwrap();
        self.state.jwt.issue_access_token(&did).unwrap()
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        build_router(self.state.clone()).oneshot(request).await.unwrap()
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn authed_json(
    method: &str,
    uri: &str,
    token: &str,
    body: Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn unauthed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
