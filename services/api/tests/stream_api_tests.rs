mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::{authed_json, body_json, spawn_app, unauthed, TestApp};
use subcults_api::bounded_contexts::scene::domain::entities::Scene;
use subcults_api::bounded_contexts::scene::domain::repository::SceneRepository;
use subcults_api::bounded_contexts::stream::domain::entities::StreamParent;
use subcults_types::{Did, GeoPoint};

async fn seed_scene(app: &TestApp, owner: &str) -> Scene {
    let scene = Scene::new(
        Did::new(owner).unwrap(),
        "Pressure Room".into(),
        GeoPoint::new(51.51, -0.08).unwrap(),
        false,
    );
    app.handles.scenes.save(&scene).await.unwrap();
    scene
}

/// Join, leave, reconnect, and the unique-active conflict.
#[tokio::test]
async fn stream_reconnection_flow() {
    let app = spawn_app();
    let scene = seed_scene(&app, "did:plc:host").await;
    let session = app
        .state
        .stream_service
        .create_or_get_active(StreamParent::Scene(scene.id))
        .await
        .unwrap();
    let token = app.token_for("did:plc:abc");

    // First join
    let response = app
        .request(authed_json(
            "POST",
            &format!("/streams/{}/join", session.id),
            &token,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["participant_id"], "user-abc");
    assert_eq!(body["reconnection_count"], 0);
    assert_eq!(body["is_reconnection"], false);
    assert_eq!(body["active_count"], 1);
    assert!(body["token"].as_str().unwrap().len() > 20);

    // Second simultaneous join conflicts
    let response = app
        .request(authed_json(
            "POST",
            &format!("/streams/{}/join", session.id),
            &token,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "conflict");

    // Leave
    let response = app
        .request(authed_json(
            "POST",
            &format!("/streams/{}/leave", session.id),
            &token,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["active_count"], 0);

    // Rejoin is a reconnection
    let response = app
        .request(authed_json(
            "POST",
            &format!("/streams/{}/join", session.id),
            &token,
            json!({"geohash": "u10hb14k"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["reconnection_count"], 1);
    assert_eq!(body["is_reconnection"], true);
    assert_eq!(body["active_count"], 1);
}

#[tokio::test]
async fn participants_endpoint_is_public_and_anonymous() {
    let app = spawn_app();
    let scene = seed_scene(&app, "did:plc:host").await;
    let session = app
        .state
        .stream_service
        .create_or_get_active(StreamParent::Scene(scene.id))
        .await
        .unwrap();
    let token = app.token_for("did:plc:abc");
    app.request(authed_json(
        "POST",
        &format!("/streams/{}/join", session.id),
        &token,
        json!({}),
    ))
    .await;

    let response = app
        .request(unauthed("GET", &format!("/streams/{}/participants", session.id)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["active_count"], 1);
    // No identities in the public view.
    assert!(body.get("participant_id").is_none());
    assert!(body.get("user_did").is_none());
}

#[tokio::test]
async fn analytics_requires_host_and_reports_session_shape() {
    let app = spawn_app();
    let scene = seed_scene(&app, "did:plc:host").await;
    let session = app
        .state
        .stream_service
        .create_or_get_active(StreamParent::Scene(scene.id))
        .await
        .unwrap();

    let listener = app.token_for("did:plc:abc");
    app.request(authed_json(
        "POST",
        &format!("/streams/{}/join", session.id),
        &listener,
        json!({"geohash": "u10hb14k"}),
    ))
    .await;
    app.request(authed_json(
        "POST",
        &format!("/streams/{}/leave", session.id),
        &listener,
        json!({}),
    ))
    .await;
    app.state.stream_service.end_stream(session.id).await.unwrap();

    // Non-host is rejected
    let response = app
        .request(authed_json(
            "GET",
            &format!("/streams/{}/analytics", session.id),
            &listener,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Host reads the post-mortem
    let host = app.token_for("did:plc:host");
    let response = app
        .request(authed_json(
            "GET",
            &format!("/streams/{}/analytics", session.id),
            &host,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["peak_concurrent"], 1);
    assert_eq!(body["unique_participants"], 1);
    assert_eq!(body["total_joins"], 1);
    assert_eq!(body["geographic_distribution"]["u10h"], 1);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = spawn_app();
    let token = app.token_for("did:plc:abc");
    let response = app
        .request(authed_json(
            "POST",
            &format!("/streams/{}/join", Uuid::new_v4()),
            &token,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "not_found");
}
