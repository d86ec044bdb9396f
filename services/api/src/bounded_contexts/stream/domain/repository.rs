use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use super::entities::{Participant, ParticipantEvent, StreamAnalytics, StreamParent, StreamSession};
use super::value_objects::ParticipantId;

pub type StreamRepositoryResult<T> = Result<T, AppError>;

#[async_trait]
pub trait StreamSessionRepository: Send + Sync {
    async fn save(&self, session: &StreamSession) -> StreamRepositoryResult<()>;
    async fn find_by_id(&self, id: Uuid) -> StreamRepositoryResult<Option<StreamSession>>;
    async fn find_active_for_parent(
        &self,
        parent: StreamParent,
    ) -> StreamRepositoryResult<Option<StreamSession>>;
    async fn set_active_count(&self, id: Uuid, count: i32) -> StreamRepositoryResult<()>;
    async fn set_locked(&self, id: Uuid, locked: bool) -> StreamRepositoryResult<()>;
    async fn set_featured(
        &self,
        id: Uuid,
        participant_id: Option<ParticipantId>,
    ) -> StreamRepositoryResult<()>;
    async fn set_ended(&self, id: Uuid, ended_at: DateTime<Utc>) -> StreamRepositoryResult<()>;
}

#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn insert(&self, participant: &Participant) -> StreamRepositoryResult<()>;

    /// The row with `left_at IS NULL` for this logical participant, if any.
    /// A partial unique index guarantees at most one.
    async fn find_active(
        &self,
        session_id: Uuid,
        participant_id: &ParticipantId,
    ) -> StreamRepositoryResult<Option<Participant>>;

    /// Historical rows for the same logical participant, newest first.
    async fn find_latest(
        &self,
        session_id: Uuid,
        participant_id: &ParticipantId,
    ) -> StreamRepositoryResult<Option<Participant>>;

    async fn mark_left(&self, row_id: Uuid, left_at: DateTime<Utc>) -> StreamRepositoryResult<()>;

    async fn count_active(&self, session_id: Uuid) -> StreamRepositoryResult<i32>;
}

#[async_trait]
pub trait ParticipantEventRepository: Send + Sync {
    async fn append(&self, event: &ParticipantEvent) -> StreamRepositoryResult<()>;

    /// Chronological order.
    async fn list_for_session(
        &self,
        session_id: Uuid,
    ) -> StreamRepositoryResult<Vec<ParticipantEvent>>;
}

#[async_trait]
pub trait StreamAnalyticsRepository: Send + Sync {
    /// One row per session; a second insert for the same session fails.
    async fn insert(&self, analytics: &StreamAnalytics) -> StreamRepositoryResult<()>;
    async fn find(&self, session_id: Uuid) -> StreamRepositoryResult<Option<StreamAnalytics>>;
}
