use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;

use crate::bounded_contexts::stream::domain::{
    entities::{Participant, ParticipantEvent, StreamAnalytics, StreamParent, StreamSession},
    repository::{
        ParticipantEventRepository, ParticipantRepository, StreamAnalyticsRepository,
        StreamRepositoryResult, StreamSessionRepository,
    },
    value_objects::ParticipantId,
};

pub struct InMemoryStreamSessionRepository {
    sessions: Mutex<HashMap<Uuid, StreamSession>>,
}

impl InMemoryStreamSessionRepository {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStreamSessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamSessionRepository for InMemoryStreamSessionRepository {
    async fn save(&self, session: &StreamSession) -> StreamRepositoryResult<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StreamRepositoryResult<Option<StreamSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn find_active_for_parent(
        &self,
        parent: StreamParent,
    ) -> StreamRepositoryResult<Option<StreamSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|s| {
                s.ended_at.is_none()
                    && s.scene_id == parent.scene_id()
                    && s.event_id == parent.event_id()
            })
            .cloned())
    }

    async fn set_active_count(&self, id: Uuid, count: i32) -> StreamRepositoryResult<()> {
        self.with_session(id, |s| s.active_participant_count = count)
    }

    async fn set_locked(&self, id: Uuid, locked: bool) -> StreamRepositoryResult<()> {
        self.with_session(id, |s| s.locked = locked)
    }

    async fn set_featured(
        &self,
        id: Uuid,
        participant_id: Option<ParticipantId>,
    ) -> StreamRepositoryResult<()> {
        self.with_session(id, |s| s.featured_participant_id = participant_id)
    }

    async fn set_ended(&self, id: Uuid, ended_at: DateTime<Utc>) -> StreamRepositoryResult<()> {
        self.with_session(id, |s| s.ended_at = Some(ended_at))
    }
}

impl InMemoryStreamSessionRepository {
    fn with_session(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut StreamSession),
    ) -> StreamRepositoryResult<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("stream session does not exist".to_string()))?;
        mutate(session);
        Ok(())
    }
}

pub struct InMemoryParticipantRepository {
    participants: Mutex<Vec<Participant>>,
}

impl InMemoryParticipantRepository {
    pub fn new() -> Self {
        Self {
            participants: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryParticipantRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryParticipantRepository {
    async fn insert(&self, participant: &Participant) -> StreamRepositoryResult<()> {
        let mut participants = self.participants.lock().unwrap_or_else(|e| e.into_inner());
        // Mirror of the partial unique index on (session, participant, active).
        let collision = participants.iter().any(|p| {
            p.session_id == participant.session_id
                && p.participant_id == participant.participant_id
                && p.is_active()
        });
        if collision {
            return Err(AppError::AlreadyActive);
        }
        participants.push(participant.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        session_id: Uuid,
        participant_id: &ParticipantId,
    ) -> StreamRepositoryResult<Option<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| {
                p.session_id == session_id && &p.participant_id == participant_id && p.is_active()
            })
            .cloned())
    }

    async fn find_latest(
        &self,
        session_id: Uuid,
        participant_id: &ParticipantId,
    ) -> StreamRepositoryResult<Option<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.session_id == session_id && &p.participant_id == participant_id)
            .max_by_key(|p| p.joined_at)
            .cloned())
    }

    async fn mark_left(&self, row_id: Uuid, left_at: DateTime<Utc>) -> StreamRepositoryResult<()> {
        let mut participants = self.participants.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(participant) = participants.iter_mut().find(|p| p.id == row_id) {
            participant.left_at = Some(left_at);
        }
        Ok(())
    }

    async fn count_active(&self, session_id: Uuid) -> StreamRepositoryResult<i32> {
        Ok(self
            .participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.session_id == session_id && p.is_active())
            .count() as i32)
    }
}

pub struct InMemoryParticipantEventRepository {
    events: Mutex<Vec<ParticipantEvent>>,
}

impl InMemoryParticipantEventRepository {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryParticipantEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticipantEventRepository for InMemoryParticipantEventRepository {
    async fn append(&self, event: &ParticipantEvent) -> StreamRepositoryResult<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: Uuid,
    ) -> StreamRepositoryResult<Vec<ParticipantEvent>> {
        let mut events: Vec<ParticipantEvent> = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }
}

pub struct InMemoryStreamAnalyticsRepository {
    analytics: Mutex<HashMap<Uuid, StreamAnalytics>>,
}

impl InMemoryStreamAnalyticsRepository {
    pub fn new() -> Self {
        Self {
            analytics: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStreamAnalyticsRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamAnalyticsRepository for InMemoryStreamAnalyticsRepository {
    async fn insert(&self, analytics: &StreamAnalytics) -> StreamRepositoryResult<()> {
        let mut store = self.analytics.lock().unwrap_or_else(|e| e.into_inner());
        if store.contains_key(&analytics.session_id) {
            return Err(AppError::Conflict(
                "analytics already computed for session".to_string(),
            ));
        }
        store.insert(analytics.session_id, analytics.clone());
        Ok(())
    }

    async fn find(&self, session_id: Uuid) -> StreamRepositoryResult<Option<StreamAnalytics>> {
        Ok(self
            .analytics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
            .cloned())
    }
}
