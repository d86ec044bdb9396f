mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use common::{authed_json, body_json, spawn_app, unauthed, TestApp};
use subcults_api::bounded_contexts::scene::domain::entities::{Membership, Scene};
use subcults_api::bounded_contexts::scene::domain::repository::{
    MembershipRepository, SceneRepository,
};
use subcults_api::bounded_contexts::scene::domain::value_objects::{MembershipRole, TrustWeight};
use subcults_types::{Did, GeoPoint};

async fn seed_scene(app: &TestApp, owner: &str) -> Scene {
    let scene = Scene::new(
        Did::new(owner).unwrap(),
        "Boiler Room".into(),
        GeoPoint::new(52.49, 13.42).unwrap(),
        false,
    );
    app.handles.scenes.save(&scene).await.unwrap();
    scene
}

/// Full alliance lifecycle over HTTP: create, patch, read, soft delete.
#[tokio::test]
async fn alliance_lifecycle() {
    let app = spawn_app();
    let owner = "did:plc:owner1";
    let token = app.token_for(owner);
    let from = seed_scene(&app, owner).await;
    let to = seed_scene(&app, "did:plc:owner2").await;

    // Create
    let response = app
        .request(authed_json(
            "POST",
            "/alliances",
            &token,
            json!({
                "from_scene_id": from.id,
                "to_scene_id": to.id,
                "weight": 0.8
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "active");
    assert_eq!(created["weight"], 0.8);
    let id = created["id"].as_str().unwrap().to_string();

    // Patch weight
    let response = app
        .request(authed_json(
            "PATCH",
            &format!("/alliances/{id}"),
            &token,
            json!({"weight": 0.9}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Public read reflects the update
    let response = app.request(unauthed("GET", &format!("/alliances/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["weight"], 0.9);

    // Delete
    let response = app
        .request(authed_json(
            "DELETE",
            &format!("/alliances/{id}"),
            &token,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Reads and repeat deletes now report the deleted state
    let response = app.request(unauthed("GET", &format!("/alliances/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "alliance_deleted"
    );

    let response = app
        .request(authed_json(
            "DELETE",
            &format!("/alliances/{id}"),
            &token,
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alliance_rejects_bad_weight_and_self_edge() {
    let app = spawn_app();
    let owner = "did:plc:owner1";
    let token = app.token_for(owner);
    let from = seed_scene(&app, owner).await;
    let to = seed_scene(&app, "did:plc:owner2").await;

    let response = app
        .request(authed_json(
            "POST",
            "/alliances",
            &token,
            json!({"from_scene_id": from.id, "to_scene_id": to.id, "weight": 1.5}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_weight");

    let response = app
        .request(authed_json(
            "POST",
            "/alliances",
            &token,
            json!({"from_scene_id": from.id, "to_scene_id": from.id, "weight": 0.5}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "self_alliance");
}

#[tokio::test]
async fn alliance_requires_authentication() {
    let app = spawn_app();
    let request = Request::builder()
        .method("POST")
        .uri("/alliances")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"from_scene_id": Uuid::new_v4(), "to_scene_id": Uuid::new_v4(), "weight": 0.5})
                .to_string(),
        ))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "auth_failed");
}

/// Two role-weighted memberships and a 0.5 outbound alliance land on 0.325.
#[tokio::test]
async fn trust_recompute_worked_example() {
    let app = spawn_app();
    let owner = "did:plc:owner1";
    let token = app.token_for(owner);
    let scene = seed_scene(&app, owner).await;
    let target = seed_scene(&app, "did:plc:owner2").await;

    let members = [
        ("did:plc:owner1", MembershipRole::Owner, 1.0),
        ("did:plc:member1", MembershipRole::Member, 0.6),
    ];
    for (member, role, weight) in members {
        app.handles
            .memberships
            .save(&Membership {
                id: Uuid::new_v4(),
                scene_id: scene.id,
                member_did: Did::new(member).unwrap(),
                role,
                trust_weight: TrustWeight::new(weight).unwrap(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let response = app
        .request(authed_json(
            "POST",
            "/alliances",
            &token,
            json!({"from_scene_id": scene.id, "to_scene_id": target.id, "weight": 0.5}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Dirty until the next cycle runs.
    let response = app
        .request(unauthed("GET", &format!("/trust/{}", scene.id)))
        .await;
    assert_eq!(body_json(response).await["stale"], true);

    app.state.trust_service.recompute_cycle().await;

    let response = app
        .request(unauthed("GET", &format!("/trust/{}", scene.id)))
        .await;
    let body = body_json(response).await;
    assert_eq!(body["stale"], false);
    let score = body["trust_score"].as_f64().unwrap();
    assert!((score - 0.325).abs() < 1e-9, "score was {score}");
    assert!(body["breakdown"].is_object());
}

#[tokio::test]
async fn trust_of_unknown_scene_is_scene_not_found() {
    let app = spawn_app();
    let response = app
        .request(unauthed("GET", &format!("/trust/{}", Uuid::new_v4())))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "scene_not_found");
}

#[tokio::test]
async fn trust_without_memberships_is_zero_with_no_breakdown() {
    let app = spawn_app();
    let scene = seed_scene(&app, "did:plc:owner1").await;

    app.state.trust_service.recompute_cycle().await;
    let response = app
        .request(unauthed("GET", &format!("/trust/{}", scene.id)))
        .await;
    let body = body_json(response).await;
    assert_eq!(body["trust_score"], 0.0);
    assert!(body.get("breakdown").is_none());
}
