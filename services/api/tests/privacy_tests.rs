mod common;

use common::spawn_app;
use subcults_api::bounded_contexts::scene::domain::entities::Scene;
use subcults_api::bounded_contexts::scene::domain::repository::SceneRepository;
use subcults_api::shared::infrastructure::privacy::jittered_display_point;
use subcults_types::{Did, GeoPoint, Geohash};

/// Consent revocation clears the precise point for good. The repository
/// enforces consent on every save, so no caller-side scrubbing is involved.
#[tokio::test]
async fn consent_revocation_clears_precise_point_permanently() {
    let app = spawn_app();
    let point = GeoPoint::new(48.86, 2.35).unwrap();
    let scene = Scene::new(
        Did::new("did:plc:owner").unwrap(),
        "Catacombes".into(),
        point,
        true,
    );
    app.handles.scenes.save(&scene).await.unwrap();

    let stored = app.handles.scenes.find_by_id(scene.id).await.unwrap().unwrap();
    assert!(stored.precise_point.is_some());
    assert_eq!(stored.geohash.len(), 6);

    // Revoke consent and persist.
    let mut scene = stored;
    scene.set_allow_precise(false);
    app.handles.scenes.save(&scene).await.unwrap();

    let stored = app.handles.scenes.find_by_id(scene.id).await.unwrap().unwrap();
    assert!(stored.precise_point.is_none());
    assert_eq!(stored.geohash.len(), 6);

    // Re-enabling consent does not resurrect the point.
    let mut scene = stored;
    scene.set_allow_precise(true);
    app.handles.scenes.save(&scene).await.unwrap();

    let stored = app.handles.scenes.find_by_id(scene.id).await.unwrap().unwrap();
    assert!(stored.precise_point.is_none());
}

/// Even an entity handed to the repository with a stale precise point under
/// revoked consent is scrubbed at the persistence boundary.
#[tokio::test]
async fn save_scrubs_inconsistent_state() {
    let app = spawn_app();
    let point = GeoPoint::new(48.86, 2.35).unwrap();
    let mut scene = Scene::new(
        Did::new("did:plc:owner").unwrap(),
        "Catacombes".into(),
        point,
        true,
    );
    // Simulate a buggy caller flipping the flag without clearing the point.
    scene.allow_precise = false;

    app.handles.scenes.save(&scene).await.unwrap();

    let stored = app.handles.scenes.find_by_id(scene.id).await.unwrap().unwrap();
    assert!(stored.precise_point.is_none());
}

#[tokio::test]
async fn display_jitter_is_session_stable_per_entity() {
    let app = spawn_app();
    let scene = Scene::new(
        Did::new("did:plc:owner").unwrap(),
        "Catacombes".into(),
        GeoPoint::new(48.86, 2.35).unwrap(),
        false,
    );
    app.handles.scenes.save(&scene).await.unwrap();
    let stored = app.handles.scenes.find_by_id(scene.id).await.unwrap().unwrap();

    let a = jittered_display_point(stored.id, &stored.geohash);
    let b = jittered_display_point(stored.id, &stored.geohash);
    assert_eq!(a, b);

    // The jittered point stays near the coarse cell, never at the raw center.
    let center = Geohash::parse(stored.geohash.as_str()).unwrap().center();
    assert!((a.lat - center.lat).abs() < 0.01);
    assert!((a.lng - center.lng).abs() < 0.01);
    assert_ne!((a.lat, a.lng), (center.lat, center.lng));
}
