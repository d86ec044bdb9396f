use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::auth::JwtService;
use subcults_types::{Did, Geohash, ANALYTICS_GEOHASH_PRECISION};

use super::analytics::compute_analytics;
use super::broadcaster::{BroadcastMessage, EventBroadcaster, PARTICIPANT_JOINED, PARTICIPANT_LEFT};
use crate::bounded_contexts::scene::domain::repository::SceneRepository;
use crate::bounded_contexts::stream::domain::{
    entities::{Participant, ParticipantEvent, StreamAnalytics, StreamParent, StreamSession},
    repository::{
        ParticipantEventRepository, ParticipantRepository, StreamAnalyticsRepository,
        StreamSessionRepository,
    },
    value_objects::{ParticipantEventType, ParticipantId},
};

/// Control-plane for live audio rooms. Join/leave mutations and their
/// broadcasts are serialized under a per-session lock so every subscriber
/// observes events in causal order and the denormalized count stays honest.
pub struct StreamSessionService {
    sessions: Arc<dyn StreamSessionRepository>,
    participants: Arc<dyn ParticipantRepository>,
    events: Arc<dyn ParticipantEventRepository>,
    analytics: Arc<dyn StreamAnalyticsRepository>,
    scenes: Arc<dyn SceneRepository>,
    broadcaster: Arc<EventBroadcaster>,
    jwt: Arc<JwtService>,
    session_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl StreamSessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn StreamSessionRepository>,
        participants: Arc<dyn ParticipantRepository>,
        events: Arc<dyn ParticipantEventRepository>,
        analytics: Arc<dyn StreamAnalyticsRepository>,
        scenes: Arc<dyn SceneRepository>,
        broadcaster: Arc<EventBroadcaster>,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            sessions,
            participants,
            events,
            analytics,
            scenes,
            broadcaster,
            jwt,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.session_locks
            .lock()
            .await
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotent: returns the existing active session for the parent, or
    /// creates one.
    pub async fn create_or_get_active(
        &self,
        parent: StreamParent,
    ) -> Result<StreamSession, AppError> {
        if let Some(existing) = self.sessions.find_active_for_parent(parent).await? {
            return Ok(existing);
        }
        let room_name = match parent {
            StreamParent::Scene(id) => format!("scene-{}", &id.simple().to_string()[..12]),
            StreamParent::Event(id) => format!("event-{}", &id.simple().to_string()[..12]),
        };
        let session = StreamSession::new(parent, room_name);
        self.sessions.save(&session).await?;
        tracing::info!(session_id = %session.id, room = %session.room_name, "stream session created");
        Ok(session)
    }

    /// Opaque 15-minute grant admitting `did` to the session's room.
    pub async fn issue_join_token(
        &self,
        session_id: Uuid,
        did: &Did,
    ) -> Result<(String, String), AppError> {
        let session = self.require_live_session(session_id).await?;
        let token = self.jwt.issue_room_grant(did, session.id, &session.room_name)?;
        Ok((token, session.room_name))
    }

    pub async fn record_join(
        &self,
        session_id: Uuid,
        did: &Did,
        geohash: Option<String>,
    ) -> Result<(Participant, bool, i32), AppError> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let session = self.require_live_session(session_id).await?;
        if session.locked {
            return Err(AppError::Forbidden("stream is locked".to_string()));
        }

        let participant_id = ParticipantId::derive(did);
        if self
            .participants
            .find_active(session.id, &participant_id)
            .await?
            .is_some()
        {
            // Same logical participant already connected, likely another tab.
            return Err(AppError::AlreadyActive);
        }

        let prior = self
            .participants
            .find_latest(session.id, &participant_id)
            .await?;
        let is_reconnection = prior.is_some();
        let reconnection_count = prior.map(|p| p.reconnection_count + 1).unwrap_or(0);

        let participant = Participant {
            id: Uuid::new_v4(),
            session_id: session.id,
            participant_id: participant_id.clone(),
            user_did: did.clone(),
            joined_at: Utc::now(),
            left_at: None,
            reconnection_count,
        };
        self.participants.insert(&participant).await?;

        let active_count = self.participants.count_active(session.id).await?;
        self.sessions.set_active_count(session.id, active_count).await?;

        let geo_prefix = geohash
            .map(Geohash::parse)
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))?
            .map(|g| g.truncated(ANALYTICS_GEOHASH_PRECISION));

        self.events
            .append(&ParticipantEvent {
                id: Uuid::new_v4(),
                session_id: session.id,
                user_did: did.clone(),
                event_type: ParticipantEventType::Join,
                geo_prefix,
                occurred_at: participant.joined_at,
            })
            .await?;

        self.broadcaster.broadcast(
            session.id,
            &BroadcastMessage {
                event_type: PARTICIPANT_JOINED,
                stream_session_id: session.id,
                participant_id: participant_id.to_string(),
                user_did: did.to_string(),
                timestamp: participant.joined_at,
                is_reconnection,
                active_count,
            },
        );

        Ok((participant, is_reconnection, active_count))
    }

    /// Idempotent: leaving twice is a no-op.
    pub async fn record_leave(&self, session_id: Uuid, did: &Did) -> Result<i32, AppError> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("stream session does not exist".to_string()))?;

        let participant_id = ParticipantId::derive(did);
        let Some(active) = self
            .participants
            .find_active(session.id, &participant_id)
            .await?
        else {
            return self.participants.count_active(session.id).await;
        };

        let left_at = Utc::now();
        self.participants.mark_left(active.id, left_at).await?;

        let active_count = self.participants.count_active(session.id).await?;
        self.sessions.set_active_count(session.id, active_count).await?;

        self.events
            .append(&ParticipantEvent {
                id: Uuid::new_v4(),
                session_id: session.id,
                user_did: did.clone(),
                event_type: ParticipantEventType::Leave,
                geo_prefix: None,
                occurred_at: left_at,
            })
            .await?;

        self.broadcaster.broadcast(
            session.id,
            &BroadcastMessage {
                event_type: PARTICIPANT_LEFT,
                stream_session_id: session.id,
                participant_id: participant_id.to_string(),
                user_did: did.to_string(),
                timestamp: left_at,
                is_reconnection: false,
                active_count,
            },
        );

        Ok(active_count)
    }

    pub async fn set_lock(&self, session_id: Uuid, locked: bool) -> Result<(), AppError> {
        self.require_live_session(session_id).await?;
        self.sessions.set_locked(session_id, locked).await
    }

    pub async fn set_featured(
        &self,
        session_id: Uuid,
        participant_id: Option<ParticipantId>,
    ) -> Result<(), AppError> {
        self.require_live_session(session_id).await?;
        self.sessions.set_featured(session_id, participant_id).await
    }

    /// Marks the session ended, then folds its event log into exactly one
    /// analytics row. Safe to call twice; the second call short-circuits.
    pub async fn end_stream(&self, session_id: Uuid) -> Result<StreamAnalytics, AppError> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("stream session does not exist".to_string()))?;

        if session.is_ended() {
            if let Some(existing) = self.analytics.find(session_id).await? {
                return Ok(existing);
            }
        } else {
            let ended_at = Utc::now();
            session.ended_at = Some(ended_at);
            self.sessions.set_ended(session_id, ended_at).await?;
        }

        let events = self.events.list_for_session(session_id).await?;
        let analytics = compute_analytics(&session, &events);
        self.analytics.insert(&analytics).await?;
        tracing::info!(
            session_id = %session_id,
            peak = analytics.peak_concurrent,
            unique = analytics.unique_participants,
            "stream ended"
        );
        Ok(analytics)
    }

    pub async fn participants_view(&self, session_id: Uuid) -> Result<(StreamSession, i32), AppError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("stream session does not exist".to_string()))?;
        let count = self.participants.count_active(session_id).await?;
        Ok((session, count))
    }

    /// Post-mortem metrics, restricted to the host (owner of the parent
    /// scene, directly or through the parent event).
    pub async fn analytics_for_host(
        &self,
        session_id: Uuid,
        actor: &Did,
    ) -> Result<StreamAnalytics, AppError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("stream session does not exist".to_string()))?;

        let scene_id = match (session.scene_id, session.event_id) {
            (Some(scene_id), _) => scene_id,
            (None, Some(event_id)) => {
                self.scenes
                    .find_event(event_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("parent event does not exist".to_string()))?
                    .scene_id
            }
            (None, None) => {
                return Err(AppError::Integrity("session has no parent".to_string()))
            }
        };
        let scene = self
            .scenes
            .find_by_id(scene_id)
            .await?
            .ok_or(AppError::SceneNotFound)?;
        if &scene.owner_did != actor {
            return Err(AppError::Forbidden(
                "analytics are restricted to the host".to_string(),
            ));
        }

        self.analytics
            .find(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("analytics not computed yet".to_string()))
    }

    pub fn subscribe(&self, session_id: Uuid) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        self.broadcaster.subscribe(session_id)
    }

    async fn require_live_session(&self, session_id: Uuid) -> Result<StreamSession, AppError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("stream session does not exist".to_string()))?;
        if session.is_ended() {
            return Err(AppError::Conflict("stream session has ended".to_string()));
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_contexts::scene::domain::entities::Scene;
    use crate::bounded_contexts::scene::infrastructure::repositories::in_memory::InMemorySceneRepository;
    use crate::bounded_contexts::stream::infrastructure::repositories::in_memory::{
        InMemoryParticipantEventRepository, InMemoryParticipantRepository,
        InMemoryStreamAnalyticsRepository, InMemoryStreamSessionRepository,
    };
    use crate::shared::infrastructure::metrics::Metrics;
    use subcults_types::GeoPoint;

    fn service() -> (StreamSessionService, Arc<InMemorySceneRepository>) {
        let scenes = Arc::new(InMemorySceneRepository::new());
        let metrics = Arc::new(Metrics::new());
        let service = StreamSessionService::new(
            Arc::new(InMemoryStreamSessionRepository::new()),
            Arc::new(InMemoryParticipantRepository::new()),
            Arc::new(InMemoryParticipantEventRepository::new()),
            Arc::new(InMemoryStreamAnalyticsRepository::new()),
            scenes.clone(),
            Arc::new(EventBroadcaster::new(metrics)),
            Arc::new(JwtService::new("0123456789abcdef0123456789abcdef", None)),
        );
        (service, scenes)
    }

    fn did(suffix: &str) -> Did {
        Did::new(format!("did:plc:{suffix}")).unwrap()
    }

    #[tokio::test]
    async fn create_or_get_is_idempotent_per_parent() {
        let (service, _) = service();
        let parent = StreamParent::Scene(Uuid::new_v4());
        let first = service.create_or_get_active(parent).await.unwrap();
        let second = service.create_or_get_active(parent).await.unwrap();
        assert_eq!(first.id, second.id);

        let other = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn join_leave_rejoin_tracks_reconnection() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        let user = did("abc");

        let (p1, is_reconnection, count) =
            service.record_join(session.id, &user, None).await.unwrap();
        assert_eq!(p1.reconnection_count, 0);
        assert!(!is_reconnection);
        assert_eq!(count, 1);

        let count = service.record_leave(session.id, &user).await.unwrap();
        assert_eq!(count, 0);

        let (p2, is_reconnection, count) =
            service.record_join(session.id, &user, None).await.unwrap();
        assert_eq!(p2.reconnection_count, 1);
        assert!(is_reconnection);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn double_join_is_already_active() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        let user = did("abc");

        service.record_join(session.id, &user, None).await.unwrap();
        let err = service.record_join(session.id, &user, None).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyActive));
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        let user = did("abc");

        service.record_join(session.id, &user, None).await.unwrap();
        assert_eq!(service.record_leave(session.id, &user).await.unwrap(), 0);
        assert_eq!(service.record_leave(session.id, &user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn locked_stream_rejects_joins() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        service.set_lock(session.id, true).await.unwrap();

        let err = service
            .record_join(session.id, &did("abc"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn featured_participant_is_settable_and_clearable() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        let featured = ParticipantId::derive(&did("spotlight"));

        service
            .set_featured(session.id, Some(featured.clone()))
            .await
            .unwrap();
        let (session_view, _) = service.participants_view(session.id).await.unwrap();
        assert_eq!(session_view.featured_participant_id, Some(featured));

        service.set_featured(session.id, None).await.unwrap();
        let (session_view, _) = service.participants_view(session.id).await.unwrap();
        assert!(session_view.featured_participant_id.is_none());
    }

    #[tokio::test]
    async fn geohash_is_truncated_to_four_chars() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        service
            .record_join(session.id, &did("abc"), Some("u4pruydq".to_string()))
            .await
            .unwrap();
        service.record_leave(session.id, &did("abc")).await.unwrap();

        let analytics = service.end_stream(session.id).await.unwrap();
        assert_eq!(analytics.geographic_distribution["u4pr"], 1);
    }

    #[tokio::test]
    async fn end_stream_twice_short_circuits() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        service.record_join(session.id, &did("abc"), None).await.unwrap();

        let first = service.end_stream(session.id).await.unwrap();
        let second = service.end_stream(session.id).await.unwrap();
        assert_eq!(first.total_joins, second.total_joins);
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn analytics_requires_host() {
        let (service, scenes) = service();
        let owner = did("host");
        let scene = Scene::new(
            owner.clone(),
            "Cellar".into(),
            GeoPoint::new(50.08, 14.43).unwrap(),
            false,
        );
        scenes.save(&scene).await.unwrap();

        let session = service
            .create_or_get_active(StreamParent::Scene(scene.id))
            .await
            .unwrap();
        service.end_stream(session.id).await.unwrap();

        let err = service
            .analytics_for_host(session.id, &did("stranger"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let analytics = service.analytics_for_host(session.id, &owner).await.unwrap();
        assert_eq!(analytics.session_id, session.id);
    }

    #[tokio::test]
    async fn subscribers_see_join_and_leave_in_order() {
        let (service, _) = service();
        let session = service
            .create_or_get_active(StreamParent::Scene(Uuid::new_v4()))
            .await
            .unwrap();
        let mut rx = service.subscribe(session.id);
        let user = did("abc");

        service.record_join(session.id, &user, None).await.unwrap();
        service.record_leave(session.id, &user).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.contains("participant_joined"));
        assert!(second.contains("participant_left"));
        assert!(second.contains("\"active_count\":0"));
    }
}
