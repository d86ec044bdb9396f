use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::shared::infrastructure::privacy::enforce_location_consent;

use crate::bounded_contexts::scene::domain::{
    entities::{Alliance, Membership, Scene, SceneEvent, TrustScore},
    repository::{
        AllianceRepository, MembershipRepository, SceneRepository, SceneRepositoryResult,
        TrustScoreRepository,
    },
    value_objects::AllianceStatus,
};

pub struct InMemorySceneRepository {
    scenes: Mutex<HashMap<Uuid, Scene>>,
    events: Mutex<HashMap<Uuid, SceneEvent>>,
}

impl InMemorySceneRepository {
    pub fn new() -> Self {
        Self {
            scenes: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySceneRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SceneRepository for InMemorySceneRepository {
    async fn save(&self, scene: &Scene) -> SceneRepositoryResult<()> {
        let mut scene = scene.clone();
        enforce_location_consent(&mut scene);
        self.scenes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(scene.id, scene);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> SceneRepositoryResult<Option<Scene>> {
        Ok(self
            .scenes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .filter(|s| !s.is_deleted())
            .cloned())
    }

    async fn soft_delete(&self, id: Uuid) -> SceneRepositoryResult<()> {
        let now = Utc::now();
        if let Some(scene) = self
            .scenes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&id)
        {
            scene.deleted_at = Some(now);
        }
        for event in self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values_mut()
            .filter(|e| e.scene_id == id)
        {
            event.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn save_event(&self, event: &SceneEvent) -> SceneRepositoryResult<()> {
        let mut event = event.clone();
        enforce_location_consent(&mut event);
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.id, event);
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> SceneRepositoryResult<Option<SceneEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .filter(|e| !e.is_deleted())
            .cloned())
    }
}

pub struct InMemoryAllianceRepository {
    alliances: Mutex<HashMap<Uuid, Alliance>>,
}

impl InMemoryAllianceRepository {
    pub fn new() -> Self {
        Self {
            alliances: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAllianceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AllianceRepository for InMemoryAllianceRepository {
    async fn upsert(&self, alliance: &Alliance) -> SceneRepositoryResult<Alliance> {
        let mut alliances = self.alliances.lock().unwrap_or_else(|e| e.into_inner());

        // Duplicate (from, to) is a deterministic update of the existing edge.
        if let Some(existing) = alliances.values_mut().find(|a| {
            a.from_scene_id == alliance.from_scene_id && a.to_scene_id == alliance.to_scene_id
        }) {
            existing.weight = alliance.weight;
            existing.reason = alliance.reason.clone();
            existing.status = AllianceStatus::Active;
            existing.deleted_at = None;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        alliances.insert(alliance.id, alliance.clone());
        Ok(alliance.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> SceneRepositoryResult<Option<Alliance>> {
        Ok(self
            .alliances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn update(&self, alliance: &Alliance) -> SceneRepositoryResult<()> {
        self.alliances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(alliance.id, alliance.clone());
        Ok(())
    }

    async fn list_outbound(&self, from_scene_id: Uuid) -> SceneRepositoryResult<Vec<Alliance>> {
        Ok(self
            .alliances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| a.from_scene_id == from_scene_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryMembershipRepository {
    memberships: Mutex<Vec<Membership>>,
}

impl InMemoryMembershipRepository {
    pub fn new() -> Self {
        Self {
            memberships: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryMembershipRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipRepository for InMemoryMembershipRepository {
    async fn save(&self, membership: &Membership) -> SceneRepositoryResult<()> {
        let mut memberships = self.memberships.lock().unwrap_or_else(|e| e.into_inner());
        match memberships.iter_mut().find(|m| m.id == membership.id) {
            Some(existing) => *existing = membership.clone(),
            None => memberships.push(membership.clone()),
        }
        Ok(())
    }

    async fn list_for_scene(&self, scene_id: Uuid) -> SceneRepositoryResult<Vec<Membership>> {
        Ok(self
            .memberships
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.scene_id == scene_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryTrustScoreRepository {
    scores: Mutex<HashMap<Uuid, TrustScore>>,
}

impl InMemoryTrustScoreRepository {
    pub fn new() -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTrustScoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrustScoreRepository for InMemoryTrustScoreRepository {
    async fn upsert(&self, score: &TrustScore) -> SceneRepositoryResult<()> {
        self.scores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(score.scene_id, score.clone());
        Ok(())
    }

    async fn find(&self, scene_id: Uuid) -> SceneRepositoryResult<Option<TrustScore>> {
        Ok(self
            .scores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&scene_id)
            .cloned())
    }
}
