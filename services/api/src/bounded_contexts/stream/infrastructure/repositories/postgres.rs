use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use subcults_types::{Did, Geohash};

use crate::bounded_contexts::stream::domain::{
    entities::{Participant, ParticipantEvent, StreamAnalytics, StreamParent, StreamSession},
    repository::{
        ParticipantEventRepository, ParticipantRepository, StreamAnalyticsRepository,
        StreamRepositoryResult, StreamSessionRepository,
    },
    value_objects::{ParticipantEventType, ParticipantId},
};

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    scene_id: Option<Uuid>,
    event_id: Option<Uuid>,
    room_name: String,
    active_participant_count: i32,
    locked: bool,
    featured_participant_id: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_entity(self) -> Result<StreamSession, AppError> {
        Ok(StreamSession {
            id: self.id,
            scene_id: self.scene_id,
            event_id: self.event_id,
            room_name: self.room_name,
            active_participant_count: self.active_participant_count,
            locked: self.locked,
            featured_participant_id: self
                .featured_participant_id
                .map(ParticipantId::parse)
                .transpose()?,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

pub struct PostgresStreamSessionRepository {
    pool: PgPool,
}

impl PostgresStreamSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, scene_id, event_id, room_name, active_participant_count, \
                               locked, featured_participant_id, started_at, ended_at";

#[async_trait]
impl StreamSessionRepository for PostgresStreamSessionRepository {
    async fn save(&self, session: &StreamSession) -> StreamRepositoryResult<()> {
        sqlx::query(
            "INSERT INTO stream_sessions (
                id, scene_id, event_id, room_name, active_participant_count,
                locked, featured_participant_id, started_at, ended_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                active_participant_count = EXCLUDED.active_participant_count,
                locked = EXCLUDED.locked,
                featured_participant_id = EXCLUDED.featured_participant_id,
                ended_at = EXCLUDED.ended_at",
        )
        .bind(session.id)
        .bind(session.scene_id)
        .bind(session.event_id)
        .bind(&session.room_name)
        .bind(session.active_participant_count)
        .bind(session.locked)
        .bind(session.featured_participant_id.as_ref().map(|p| p.as_str()))
        .bind(session.started_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StreamRepositoryResult<Option<StreamSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM stream_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRow::into_entity).transpose()
    }

    async fn find_active_for_parent(
        &self,
        parent: StreamParent,
    ) -> StreamRepositoryResult<Option<StreamSession>> {
        let row: Option<SessionRow> = match parent {
            StreamParent::Scene(scene_id) => {
                sqlx::query_as(&format!(
                    "SELECT {SESSION_COLUMNS} FROM stream_sessions
                     WHERE scene_id = $1 AND ended_at IS NULL"
                ))
                .bind(scene_id)
                .fetch_optional(&self.pool)
                .await?
            }
            StreamParent::Event(event_id) => {
                sqlx::query_as(&format!(
                    "SELECT {SESSION_COLUMNS} FROM stream_sessions
                     WHERE event_id = $1 AND ended_at IS NULL"
                ))
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.map(SessionRow::into_entity).transpose()
    }

    async fn set_active_count(&self, id: Uuid, count: i32) -> StreamRepositoryResult<()> {
        sqlx::query("UPDATE stream_sessions SET active_participant_count = $1 WHERE id = $2")
            .bind(count)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_locked(&self, id: Uuid, locked: bool) -> StreamRepositoryResult<()> {
        sqlx::query("UPDATE stream_sessions SET locked = $1 WHERE id = $2")
            .bind(locked)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_featured(
        &self,
        id: Uuid,
        participant_id: Option<ParticipantId>,
    ) -> StreamRepositoryResult<()> {
        sqlx::query("UPDATE stream_sessions SET featured_participant_id = $1 WHERE id = $2")
            .bind(participant_id.as_ref().map(|p| p.as_str().to_string()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_ended(&self, id: Uuid, ended_at: DateTime<Utc>) -> StreamRepositoryResult<()> {
        sqlx::query("UPDATE stream_sessions SET ended_at = $1 WHERE id = $2 AND ended_at IS NULL")
            .bind(ended_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct ParticipantRow {
    id: Uuid,
    session_id: Uuid,
    participant_id: String,
    user_did: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    reconnection_count: i32,
}

impl ParticipantRow {
    fn into_entity(self) -> Result<Participant, AppError> {
        Ok(Participant {
            id: self.id,
            session_id: self.session_id,
            participant_id: ParticipantId::parse(self.participant_id)?,
            user_did: Did::new(self.user_did)
                .map_err(|e| AppError::Integrity(format!("stored DID invalid: {e}")))?,
            joined_at: self.joined_at,
            left_at: self.left_at,
            reconnection_count: self.reconnection_count,
        })
    }
}

pub struct PostgresParticipantRepository {
    pool: PgPool,
}

impl PostgresParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PostgresParticipantRepository {
    async fn insert(&self, participant: &Participant) -> StreamRepositoryResult<()> {
        let result = sqlx::query(
            "INSERT INTO stream_participants (
                id, session_id, participant_id, user_did, joined_at, left_at, reconnection_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(participant.id)
        .bind(participant.session_id)
        .bind(participant.participant_id.as_str())
        .bind(participant.user_did.as_str())
        .bind(participant.joined_at)
        .bind(participant.left_at)
        .bind(participant.reconnection_count)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // The partial unique index rejects a second active row.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::AlreadyActive)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_active(
        &self,
        session_id: Uuid,
        participant_id: &ParticipantId,
    ) -> StreamRepositoryResult<Option<Participant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            "SELECT id, session_id, participant_id, user_did, joined_at, left_at, reconnection_count
             FROM stream_participants
             WHERE session_id = $1 AND participant_id = $2 AND left_at IS NULL",
        )
        .bind(session_id)
        .bind(participant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ParticipantRow::into_entity).transpose()
    }

    async fn find_latest(
        &self,
        session_id: Uuid,
        participant_id: &ParticipantId,
    ) -> StreamRepositoryResult<Option<Participant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            "SELECT id, session_id, participant_id, user_did, joined_at, left_at, reconnection_count
             FROM stream_participants
             WHERE session_id = $1 AND participant_id = $2
             ORDER BY joined_at DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(participant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ParticipantRow::into_entity).transpose()
    }

    async fn mark_left(&self, row_id: Uuid, left_at: DateTime<Utc>) -> StreamRepositoryResult<()> {
        sqlx::query("UPDATE stream_participants SET left_at = $1 WHERE id = $2 AND left_at IS NULL")
            .bind(left_at)
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_active(&self, session_id: Uuid) -> StreamRepositoryResult<i32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM stream_participants WHERE session_id = $1 AND left_at IS NULL",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as i32)
    }
}

pub struct PostgresParticipantEventRepository {
    pool: PgPool,
}

impl PostgresParticipantEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantEventRepository for PostgresParticipantEventRepository {
    async fn append(&self, event: &ParticipantEvent) -> StreamRepositoryResult<()> {
        sqlx::query(
            "INSERT INTO participant_events (id, session_id, user_did, event_type, geo_prefix, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.session_id)
        .bind(event.user_did.as_str())
        .bind(event.event_type.as_str())
        .bind(event.geo_prefix.as_ref().map(|g| g.as_str().to_string()))
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: Uuid,
    ) -> StreamRepositoryResult<Vec<ParticipantEvent>> {
        let rows: Vec<(Uuid, Uuid, String, String, Option<String>, DateTime<Utc>)> =
            sqlx::query_as(
                "SELECT id, session_id, user_did, event_type, geo_prefix, occurred_at
                 FROM participant_events WHERE session_id = $1 ORDER BY occurred_at ASC",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(id, session_id, user_did, event_type, geo_prefix, occurred_at)| {
                Ok(ParticipantEvent {
                    id,
                    session_id,
                    user_did: Did::new(user_did)
                        .map_err(|e| AppError::Integrity(format!("stored DID invalid: {e}")))?,
                    event_type: ParticipantEventType::parse(&event_type)?,
                    geo_prefix: geo_prefix
                        .map(Geohash::parse)
                        .transpose()
                        .map_err(|e| AppError::Integrity(format!("stored geohash invalid: {e}")))?,
                    occurred_at,
                })
            })
            .collect()
    }
}

pub struct PostgresStreamAnalyticsRepository {
    pool: PgPool,
}

impl PostgresStreamAnalyticsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StreamAnalyticsRepository for PostgresStreamAnalyticsRepository {
    async fn insert(&self, analytics: &StreamAnalytics) -> StreamRepositoryResult<()> {
        let distribution = serde_json::to_value(&analytics.geographic_distribution)
            .map_err(|e| AppError::Internal(format!("distribution serialize failed: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO stream_analytics (
                session_id, peak_concurrent, unique_participants, total_joins,
                duration_seconds, engagement_lag_seconds, mean_listen_seconds,
                median_listen_seconds, geographic_distribution
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(analytics.session_id)
        .bind(analytics.peak_concurrent)
        .bind(analytics.unique_participants)
        .bind(analytics.total_joins)
        .bind(analytics.duration_seconds)
        .bind(analytics.engagement_lag_seconds)
        .bind(analytics.mean_listen_seconds)
        .bind(analytics.median_listen_seconds)
        .bind(distribution)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
                "analytics already computed for session".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, session_id: Uuid) -> StreamRepositoryResult<Option<StreamAnalytics>> {
        let row: Option<(
            Uuid,
            i32,
            i32,
            i32,
            i64,
            Option<i64>,
            Option<f64>,
            Option<f64>,
            serde_json::Value,
        )> = sqlx::query_as(
            "SELECT session_id, peak_concurrent, unique_participants, total_joins,
                    duration_seconds, engagement_lag_seconds, mean_listen_seconds,
                    median_listen_seconds, geographic_distribution
             FROM stream_analytics WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let geographic_distribution: HashMap<String, i64> = serde_json::from_value(row.8)
                .map_err(|e| AppError::Integrity(format!("stored distribution invalid: {e}")))?;
            Ok(StreamAnalytics {
                session_id: row.0,
                peak_concurrent: row.1,
                unique_participants: row.2,
                total_joins: row.3,
                duration_seconds: row.4,
                engagement_lag_seconds: row.5,
                mean_listen_seconds: row.6,
                median_listen_seconds: row.7,
                geographic_distribution,
            })
        })
        .transpose()
    }
}
