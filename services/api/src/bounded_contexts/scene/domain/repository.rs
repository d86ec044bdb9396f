use async_trait::async_trait;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use super::entities::{Alliance, Membership, Scene, SceneEvent, TrustScore};

pub type SceneRepositoryResult<T> = Result<T, AppError>;

#[async_trait]
pub trait SceneRepository: Send + Sync {
    async fn save(&self, scene: &Scene) -> SceneRepositoryResult<()>;

    /// Soft-deleted scenes are not returned.
    async fn find_by_id(&self, id: Uuid) -> SceneRepositoryResult<Option<Scene>>;

    /// Soft-delete the scene and its dependents (events, outbound alliances,
    /// memberships, streams).
    async fn soft_delete(&self, id: Uuid) -> SceneRepositoryResult<()>;

    async fn save_event(&self, event: &SceneEvent) -> SceneRepositoryResult<()>;

    /// Soft-deleted events are not returned.
    async fn find_event(&self, id: Uuid) -> SceneRepositoryResult<Option<SceneEvent>>;
}

#[async_trait]
pub trait AllianceRepository: Send + Sync {
    /// Creating a duplicate `(from, to)` edge is a deterministic update:
    /// weight/reason are replaced, status resets to active and any soft
    /// delete is cleared.
    async fn upsert(&self, alliance: &Alliance) -> SceneRepositoryResult<Alliance>;

    /// Returns soft-deleted rows too; callers decide how deletion surfaces.
    async fn find_by_id(&self, id: Uuid) -> SceneRepositoryResult<Option<Alliance>>;

    async fn update(&self, alliance: &Alliance) -> SceneRepositoryResult<()>;

    /// Outbound edges of a scene, soft-deleted rows included; score
    /// computation filters on `counts_for_score`.
    async fn list_outbound(&self, from_scene_id: Uuid) -> SceneRepositoryResult<Vec<Alliance>>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn save(&self, membership: &Membership) -> SceneRepositoryResult<()>;
    async fn list_for_scene(&self, scene_id: Uuid) -> SceneRepositoryResult<Vec<Membership>>;
}

#[async_trait]
pub trait TrustScoreRepository: Send + Sync {
    async fn upsert(&self, score: &TrustScore) -> SceneRepositoryResult<()>;
    async fn find(&self, scene_id: Uuid) -> SceneRepositoryResult<Option<TrustScore>>;
}
