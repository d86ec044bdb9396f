use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::audit::{AuditOutcome, AuditStore};
use crate::shared::infrastructure::metrics::Metrics;
use subcults_types::Did;

use super::dto::{AllianceResponse, CreateAllianceRequest, TrustResponse, UpdateAllianceRequest};
use crate::bounded_contexts::scene::domain::{
    entities::{Alliance, TrustScore},
    repository::{AllianceRepository, MembershipRepository, SceneRepository, TrustScoreRepository},
    services::compute_trust_score,
    value_objects::{AllianceReason, AllianceWeight},
};

/// Scenes whose cached score no longer reflects the edge/membership tables.
/// Both endpoints of a changed edge are marked: the origin because its score
/// formula reads outbound weights, the target because its incoming edge set
/// changed and its cached score is stale to readers.
#[derive(Default)]
pub struct DirtyScenes {
    inner: Mutex<HashSet<Uuid>>,
}

impl DirtyScenes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, scene_id: Uuid) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).insert(scene_id);
    }

    pub fn contains(&self, scene_id: Uuid) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&scene_id)
    }

    pub fn drain(&self) -> Vec<Uuid> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AllianceService {
    scenes: Arc<dyn SceneRepository>,
    alliances: Arc<dyn AllianceRepository>,
    dirty: Arc<DirtyScenes>,
    audit: Arc<dyn AuditStore>,
}

impl AllianceService {
    pub fn new(
        scenes: Arc<dyn SceneRepository>,
        alliances: Arc<dyn AllianceRepository>,
        dirty: Arc<DirtyScenes>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            scenes,
            alliances,
            dirty,
            audit,
        }
    }

    /// Only the owner of the edge origin may mutate it.
    async fn authorize_origin_owner(&self, actor: &Did, scene_id: Uuid) -> Result<(), AppError> {
        let scene = self
            .scenes
            .find_by_id(scene_id)
            .await?
            .ok_or(AppError::SceneNotFound)?;
        if &scene.owner_did != actor {
            return Err(AppError::Forbidden(
                "only the scene owner may manage its alliances".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn create(
        &self,
        actor: &Did,
        request: CreateAllianceRequest,
    ) -> Result<AllianceResponse, AppError> {
        self.authorize_origin_owner(actor, request.from_scene_id).await?;

        // The target must exist too, or the edge would dangle.
        self.scenes
            .find_by_id(request.to_scene_id)
            .await?
            .ok_or(AppError::SceneNotFound)?;

        let weight = AllianceWeight::new(request.weight)?;
        let reason = request.reason.map(AllianceReason::new).transpose()?;
        let alliance = Alliance::new(request.from_scene_id, request.to_scene_id, weight, reason)?;

        let saved = self.alliances.upsert(&alliance).await?;
        self.dirty.mark(saved.from_scene_id);
        self.dirty.mark(saved.to_scene_id);
        self.audit
            .append(actor.as_str(), "alliance.create", AuditOutcome::Success, None, None)
            .await?;
        Ok(AllianceResponse::from(&saved))
    }

    pub async fn get(&self, id: Uuid) -> Result<AllianceResponse, AppError> {
        let alliance = self
            .alliances
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("alliance does not exist".to_string()))?;
        if alliance.is_deleted() {
            return Err(AppError::AllianceDeleted);
        }
        Ok(AllianceResponse::from(&alliance))
    }

    pub async fn update(
        &self,
        actor: &Did,
        id: Uuid,
        request: UpdateAllianceRequest,
    ) -> Result<AllianceResponse, AppError> {
        let mut alliance = self
            .alliances
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("alliance does not exist".to_string()))?;
        if alliance.is_deleted() {
            return Err(AppError::AllianceDeleted);
        }
        self.authorize_origin_owner(actor, alliance.from_scene_id).await?;

        if let Some(weight) = request.weight {
            alliance.weight = AllianceWeight::new(weight)?;
        }
        if let Some(reason) = request.reason {
            alliance.reason = Some(AllianceReason::new(reason)?);
        }
        alliance.updated_at = Utc::now();

        self.alliances.update(&alliance).await?;
        self.dirty.mark(alliance.from_scene_id);
        self.dirty.mark(alliance.to_scene_id);
        self.audit
            .append(actor.as_str(), "alliance.update", AuditOutcome::Success, None, None)
            .await?;
        Ok(AllianceResponse::from(&alliance))
    }

    pub async fn delete(&self, actor: &Did, id: Uuid) -> Result<(), AppError> {
        let mut alliance = self
            .alliances
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("alliance does not exist".to_string()))?;
        if alliance.is_deleted() {
            // Second delete is indistinguishable from reading a deleted edge.
            return Err(AppError::AllianceDeleted);
        }
        self.authorize_origin_owner(actor, alliance.from_scene_id).await?;

        alliance.soft_delete();
        self.alliances.update(&alliance).await?;
        self.dirty.mark(alliance.from_scene_id);
        self.dirty.mark(alliance.to_scene_id);
        self.audit
            .append(actor.as_str(), "alliance.delete", AuditOutcome::Success, None, None)
            .await?;
        Ok(())
    }
}

pub struct TrustService {
    scenes: Arc<dyn SceneRepository>,
    alliances: Arc<dyn AllianceRepository>,
    memberships: Arc<dyn MembershipRepository>,
    scores: Arc<dyn TrustScoreRepository>,
    dirty: Arc<DirtyScenes>,
    metrics: Arc<Metrics>,
    recompute_interval: Duration,
    cycle_timeout: Duration,
}

impl TrustService {
    pub fn new(
        scenes: Arc<dyn SceneRepository>,
        alliances: Arc<dyn AllianceRepository>,
        memberships: Arc<dyn MembershipRepository>,
        scores: Arc<dyn TrustScoreRepository>,
        dirty: Arc<DirtyScenes>,
        metrics: Arc<Metrics>,
        recompute_interval: Duration,
    ) -> Self {
        Self {
            scenes,
            alliances,
            memberships,
            scores,
            dirty,
            metrics,
            recompute_interval,
            cycle_timeout: Duration::from_secs(30),
        }
    }

    /// Score + stale flag + informational breakdown for one scene.
    pub async fn read(&self, scene_id: Uuid) -> Result<TrustResponse, AppError> {
        self.scenes
            .find_by_id(scene_id)
            .await?
            .ok_or(AppError::SceneNotFound)?;

        let cached = self.scores.find(scene_id).await?;
        let stale = self.dirty.contains(scene_id);

        let memberships = self.memberships.list_for_scene(scene_id).await?;
        let alliances = self.alliances.list_outbound(scene_id).await?;
        let (_, breakdown) = compute_trust_score(&alliances, &memberships);

        Ok(TrustResponse {
            scene_id,
            trust_score: cached.as_ref().map(|s| s.score).unwrap_or(0.0),
            stale,
            last_updated: cached.map(|s| s.last_updated),
            breakdown,
        })
    }

    /// Recompute every dirty scene. Failures put the scene back in the dirty
    /// set for the next cycle.
    pub async fn recompute_cycle(&self) {
        let started = Instant::now();
        let dirty = self.dirty.drain();
        if dirty.is_empty() {
            return;
        }
        tracing::debug!(count = dirty.len(), "trust recompute cycle starting");

        for scene_id in dirty {
            if started.elapsed() > self.cycle_timeout {
                // Cycle deadline reached; untreated scenes stay dirty.
                self.dirty.mark(scene_id);
                continue;
            }
            match self.recompute_scene(scene_id).await {
                Ok(()) => self.metrics.trust_scenes_processed_total.inc(),
                Err(e) => {
                    tracing::warn!(scene_id = %scene_id, error = %e, "trust recompute failed");
                    self.metrics.trust_recompute_failures_total.inc();
                    self.dirty.mark(scene_id);
                }
            }
        }

        self.metrics
            .trust_cycle_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .trust_last_recompute_timestamp
            .set(Utc::now().timestamp());
    }

    async fn recompute_scene(&self, scene_id: Uuid) -> Result<(), AppError> {
        let alliances = self.alliances.list_outbound(scene_id).await?;
        let memberships = self.memberships.list_for_scene(scene_id).await?;
        let (score, _) = compute_trust_score(&alliances, &memberships);
        self.scores
            .upsert(&TrustScore {
                scene_id,
                score,
                last_updated: Utc::now(),
            })
            .await
    }

    /// Timer-driven recompute loop; exits when the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.recompute_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.recompute_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("trust recompute loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_contexts::scene::domain::entities::{Membership, Scene};
    use crate::bounded_contexts::scene::domain::value_objects::{MembershipRole, TrustWeight};
    use crate::bounded_contexts::scene::infrastructure::repositories::in_memory::{
        InMemoryAllianceRepository, InMemoryMembershipRepository, InMemorySceneRepository,
        InMemoryTrustScoreRepository,
    };
    use crate::shared::infrastructure::audit::InMemoryAuditStore;
    use subcults_types::GeoPoint;

    struct Fixture {
        scenes: Arc<InMemorySceneRepository>,
        memberships: Arc<InMemoryMembershipRepository>,
        dirty: Arc<DirtyScenes>,
        alliance_service: AllianceService,
        trust_service: TrustService,
    }

    fn fixture() -> Fixture {
        let scenes = Arc::new(InMemorySceneRepository::new());
        let alliances = Arc::new(InMemoryAllianceRepository::new());
        let memberships = Arc::new(InMemoryMembershipRepository::new());
        let scores = Arc::new(InMemoryTrustScoreRepository::new());
        let dirty = Arc::new(DirtyScenes::new());
        let metrics = Arc::new(Metrics::new());

        let alliance_service = AllianceService::new(
            scenes.clone(),
            alliances.clone(),
            dirty.clone(),
            Arc::new(InMemoryAuditStore::new()),
        );
        let trust_service = TrustService::new(
            scenes.clone(),
            alliances.clone(),
            memberships.clone(),
            scores,
            dirty.clone(),
            metrics,
            Duration::from_secs(30),
        );

        Fixture {
            scenes,
            memberships,
            dirty,
            alliance_service,
            trust_service,
        }
    }

    async fn seed_scene(fixture: &Fixture, owner: &str) -> Scene {
        let scene = Scene::new(
            Did::new(owner).unwrap(),
            "Warehouse".into(),
            GeoPoint::new(41.39, 2.17).unwrap(),
            false,
        );
        fixture.scenes.save(&scene).await.unwrap();
        scene
    }

    #[tokio::test]
    async fn create_requires_origin_ownership() {
        let fixture = fixture();
        let from = seed_scene(&fixture, "did:plc:owner").await;
        let to = seed_scene(&fixture, "did:plc:other").await;

        let err = fixture
            .alliance_service
            .create(
                &Did::new("did:plc:stranger").unwrap(),
                CreateAllianceRequest {
                    from_scene_id: from.id,
                    to_scene_id: to.id,
                    weight: 0.8,
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn alliance_lifecycle_create_update_delete() {
        let fixture = fixture();
        let owner = Did::new("did:plc:owner").unwrap();
        let from = seed_scene(&fixture, "did:plc:owner").await;
        let to = seed_scene(&fixture, "did:plc:other").await;

        let created = fixture
            .alliance_service
            .create(
                &owner,
                CreateAllianceRequest {
                    from_scene_id: from.id,
                    to_scene_id: to.id,
                    weight: 0.8,
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.status, "active");
        assert!(fixture.dirty.contains(from.id));
        assert!(fixture.dirty.contains(to.id));

        let updated = fixture
            .alliance_service
            .update(
                &owner,
                created.id,
                UpdateAllianceRequest {
                    weight: Some(0.9),
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert!((updated.weight - 0.9).abs() < f64::EPSILON);

        fixture.alliance_service.delete(&owner, created.id).await.unwrap();

        let err = fixture.alliance_service.get(created.id).await.unwrap_err();
        assert!(matches!(err, AppError::AllianceDeleted));

        // A second delete reports the same deleted state.
        let err = fixture
            .alliance_service
            .delete(&owner, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AllianceDeleted));
    }

    #[tokio::test]
    async fn recompute_clears_dirty_and_read_reports_stale() {
        let fixture = fixture();
        let owner = Did::new("did:plc:owner").unwrap();
        let scene = seed_scene(&fixture, "did:plc:owner").await;
        let target = seed_scene(&fixture, "did:plc:other").await;

        for (role, weight) in [(MembershipRole::Owner, 1.0), (MembershipRole::Member, 0.6)] {
            fixture
                .memberships
                .save(&Membership {
                    id: Uuid::new_v4(),
                    scene_id: scene.id,
                    member_did: owner.clone(),
                    role,
                    trust_weight: TrustWeight::new(weight).unwrap(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        fixture
            .alliance_service
            .create(
                &owner,
                CreateAllianceRequest {
                    from_scene_id: scene.id,
                    to_scene_id: target.id,
                    weight: 0.5,
                    reason: None,
                },
            )
            .await
            .unwrap();

        let before = fixture.trust_service.read(scene.id).await.unwrap();
        assert!(before.stale);

        fixture.trust_service.recompute_cycle().await;

        let after = fixture.trust_service.read(scene.id).await.unwrap();
        assert!(!after.stale);
        assert!((after.trust_score - 0.325).abs() < 1e-9);
        assert!(after.breakdown.is_some());
    }

    #[tokio::test]
    async fn read_unknown_scene_is_scene_not_found() {
        let fixture = fixture();
        let err = fixture.trust_service.read(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::SceneNotFound));
    }
}
