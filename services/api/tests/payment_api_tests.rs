mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use uuid::Uuid;

use common::{authed_json, body_json, spawn_app, TestApp};
use subcults_api::bounded_contexts::payment::infrastructure::signature::signature_header;
use subcults_api::bounded_contexts::scene::domain::entities::Scene;
use subcults_api::bounded_contexts::scene::domain::repository::SceneRepository;
use subcults_types::{Did, GeoPoint};

const WEBHOOK_SECRET: &str = "whsec_testsecret";

async fn onboarded_scene(app: &TestApp, owner: &str) -> Scene {
    let mut scene = Scene::new(
        Did::new(owner).unwrap(),
        "Substation".into(),
        GeoPoint::new(55.68, 12.57).unwrap(),
        false,
    );
    scene.connected_account_id = Some("acct_test_seeded".into());
    app.handles.scenes.save(&scene).await.unwrap();
    scene
}

fn checkout_body(scene_id: Uuid) -> serde_json::Value {
    json!({
        "scene_id": scene_id,
        "success_url": "https://subcults.net/paid",
        "cancel_url": "https://subcults.net/canceled",
        "currency": "eur",
        "items": [{"name": "guest list", "amount": 1200, "quantity": 1}]
    })
}

fn checkout_request(token: &str, key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments/checkout")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"));
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn webhook_request(body: &[u8], timestamp: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/internal/stripe")
        .header("content-type", "application/json")
        .header(
            "stripe-signature",
            signature_header(WEBHOOK_SECRET, body, timestamp),
        )
        .body(Body::from(body.to_vec()))
        .unwrap()
}

fn succeeded_event(session_id: &str, event_id: &str, intent_id: &str) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {"object": {
            "id": intent_id,
            "amount": 1200,
            "currency": "eur",
            "metadata": {"checkout_session_id": session_id}
        }}
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn checkout_requires_idempotency_key() {
    let app = spawn_app();
    let scene = onboarded_scene(&app, "did:plc:owner").await;
    let token = app.token_for("did:plc:payer");

    let response = app
        .request(checkout_request(&token, None, checkout_body(scene.id)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "missing_idempotency_key"
    );

    let long_key = "k".repeat(65);
    let response = app
        .request(checkout_request(&token, Some(&long_key), checkout_body(scene.id)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "idempotency_key_too_long"
    );
}

#[tokio::test]
async fn duplicate_checkout_replays_cached_response() {
    let app = spawn_app();
    let scene = onboarded_scene(&app, "did:plc:owner").await;
    let token = app.token_for("did:plc:payer");

    let response = app
        .request(checkout_request(&token, Some("order-77"), checkout_body(scene.id)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await;

    let response = app
        .request(checkout_request(&token, Some("order-77"), checkout_body(scene.id)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let second = body_json(response).await;
    assert_eq!(first["session_id"], second["session_id"]);
}

/// The webhook drives the state machine; replays and invalid transitions
/// are absorbed without mutation.
#[tokio::test]
async fn webhook_replay_and_invalid_transition() {
    let app = spawn_app();
    let scene = onboarded_scene(&app, "did:plc:owner").await;
    let payer = app.token_for("did:plc:payer");

    let response = app
        .request(checkout_request(&payer, Some("order-1"), checkout_body(scene.id)))
        .await;
    let session_id = body_json(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    // pending -> succeeded
    let event = succeeded_event(&session_id, "evt_1", "pi_1");
    let response = app.request(webhook_request(&event, "1712000000")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let status_request = Request::builder()
        .method("GET")
        .uri(format!("/payments/status?session_id={session_id}"))
        .header("authorization", format!("Bearer {payer}"))
        .body(Body::empty())
        .unwrap();
    let response = app.request(status_request).await;
    let body = body_json(response).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["amount"], 1200);

    // Replay: 200, no state change
    let response = app.request(webhook_request(&event, "1712000000")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // succeeded -> failed is invalid; still 200, no mutation
    let failed = json!({
        "id": "evt_2",
        "type": "payment_intent.payment_failed",
        "data": {"object": {
            "id": "pi_1",
            "metadata": {"checkout_session_id": session_id},
            "last_payment_error": {"message": "card declined"}
        }}
    })
    .to_string()
    .into_bytes();
    let response = app.request(webhook_request(&failed, "1712000001")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let status_request = Request::builder()
        .method("GET")
        .uri(format!("/payments/status?session_id={session_id}"))
        .header("authorization", format!("Bearer {payer}"))
        .body(Body::empty())
        .unwrap();
    let response = app.request(status_request).await;
    assert_eq!(body_json(response).await["status"], "succeeded");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = spawn_app();
    let body = succeeded_event("cs_x", "evt_1", "pi_1");
    let request = Request::builder()
        .method("POST")
        .uri("/internal/stripe")
        .header("stripe-signature", "t=1,v1=deadbeef")
        .body(Body::from(body))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_is_restricted_to_creator_or_owner() {
    let app = spawn_app();
    let scene = onboarded_scene(&app, "did:plc:owner").await;
    let payer = app.token_for("did:plc:payer");

    let response = app
        .request(checkout_request(&payer, Some("order-1"), checkout_body(scene.id)))
        .await;
    let session_id = body_json(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let stranger = app.token_for("did:plc:stranger");
    let request = Request::builder()
        .method("GET")
        .uri(format!("/payments/status?session_id={session_id}"))
        .header("authorization", format!("Bearer {stranger}"))
        .body(Body::empty())
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let owner = app.token_for("did:plc:owner");
    let request = Request::builder()
        .method("GET")
        .uri(format!("/payments/status?session_id={session_id}"))
        .header("authorization", format!("Bearer {owner}"))
        .body(Body::empty())
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn onboarding_flow_links_connected_account() {
    let app = spawn_app();
    let owner = "did:plc:owner";
    let scene = Scene::new(
        Did::new(owner).unwrap(),
        "Substation".into(),
        GeoPoint::new(55.68, 12.57).unwrap(),
        false,
    );
    app.handles.scenes.save(&scene).await.unwrap();

    let token = app.token_for(owner);
    let response = app
        .request(authed_json(
            "POST",
            "/payments/onboard",
            &token,
            json!({
                "scene_id": scene.id,
                "refresh_url": "https://subcults.net/onboard/refresh",
                "return_url": "https://subcults.net/onboard/done"
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["onboarding_url"].as_str().unwrap().starts_with("https://"));

    let stored = app.handles.scenes.find_by_id(scene.id).await.unwrap().unwrap();
    assert!(stored.connected_account_id.is_some());
}
