use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::privacy::enforce_location_consent;
use subcults_types::{Did, GeoPoint, Geohash};

use crate::bounded_contexts::scene::domain::{
    entities::{Alliance, Membership, Scene, SceneEvent, TrustScore},
    repository::{
        AllianceRepository, MembershipRepository, SceneRepository, SceneRepositoryResult,
        TrustScoreRepository,
    },
    value_objects::{
        AllianceReason, AllianceStatus, AllianceWeight, MembershipRole, TrustWeight, Visibility,
    },
};

#[derive(FromRow)]
struct SceneRow {
    id: Uuid,
    owner_did: String,
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    visibility: String,
    allow_precise: bool,
    precise_lat: Option<f64>,
    precise_lng: Option<f64>,
    geohash: String,
    connected_account_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl SceneRow {
    fn into_entity(self) -> Result<Scene, AppError> {
        let precise_point = match (self.precise_lat, self.precise_lng) {
            (Some(lat), Some(lng)) => Some(
                GeoPoint::new(lat, lng)
                    .map_err(|e| AppError::Integrity(format!("stored point invalid: {e}")))?,
            ),
            _ => None,
        };
        Ok(Scene {
            id: self.id,
            owner_did: Did::new(self.owner_did)
                .map_err(|e| AppError::Integrity(format!("stored DID invalid: {e}")))?,
            name: self.name,
            description: self.description,
            tags: self.tags,
            visibility: Visibility::parse(&self.visibility)?,
            allow_precise: self.allow_precise,
            precise_point,
            geohash: Geohash::parse(self.geohash)
                .map_err(|e| AppError::Integrity(format!("stored geohash invalid: {e}")))?,
            connected_account_id: self.connected_account_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

pub struct PostgresSceneRepository {
    pool: PgPool,
}

impl PostgresSceneRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SceneRepository for PostgresSceneRepository {
    async fn save(&self, scene: &Scene) -> SceneRepositoryResult<()> {
        // The CHECK constraint mirrors this; enforcement happens here first
        // so a consent-violating row never reaches the database.
        let mut scene = scene.clone();
        enforce_location_consent(&mut scene);
        let scene = &scene;
        sqlx::query(
            "INSERT INTO scenes (
                id, owner_did, name, description, tags, visibility, allow_precise,
                precise_lat, precise_lng, geohash, connected_account_id,
                created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                tags = EXCLUDED.tags,
                visibility = EXCLUDED.visibility,
                allow_precise = EXCLUDED.allow_precise,
                precise_lat = EXCLUDED.precise_lat,
                precise_lng = EXCLUDED.precise_lng,
                geohash = EXCLUDED.geohash,
                connected_account_id = EXCLUDED.connected_account_id,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at",
        )
        .bind(scene.id)
        .bind(scene.owner_did.as_str())
        .bind(&scene.name)
        .bind(&scene.description)
        .bind(&scene.tags)
        .bind(scene.visibility.as_str())
        .bind(scene.allow_precise)
        .bind(scene.precise_point.map(|p| p.lat))
        .bind(scene.precise_point.map(|p| p.lng))
        .bind(scene.geohash.as_str())
        .bind(&scene.connected_account_id)
        .bind(scene.created_at)
        .bind(scene.updated_at)
        .bind(scene.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> SceneRepositoryResult<Option<Scene>> {
        let row: Option<SceneRow> = sqlx::query_as(
            "SELECT id, owner_did, name, description, tags, visibility, allow_precise,
                    precise_lat, precise_lng, geohash, connected_account_id,
                    created_at, updated_at, deleted_at
             FROM scenes WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SceneRow::into_entity).transpose()
    }

    async fn soft_delete(&self, id: Uuid) -> SceneRepositoryResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE scenes SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND deleted_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        // Dependents follow the aggregate.
        sqlx::query("UPDATE scene_events SET deleted_at = $1 WHERE scene_id = $2 AND deleted_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE alliances SET deleted_at = $1 WHERE from_scene_id = $2 AND deleted_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM memberships WHERE scene_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE stream_sessions SET ended_at = $1 WHERE scene_id = $2 AND ended_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_event(&self, event: &SceneEvent) -> SceneRepositoryResult<()> {
        let mut event = event.clone();
        enforce_location_consent(&mut event);
        let event = &event;
        sqlx::query(
            "INSERT INTO scene_events (
                id, scene_id, name, starts_at, ends_at, canceled, allow_precise,
                precise_lat, precise_lng, geohash, stream_session_id,
                created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                canceled = EXCLUDED.canceled,
                allow_precise = EXCLUDED.allow_precise,
                precise_lat = EXCLUDED.precise_lat,
                precise_lng = EXCLUDED.precise_lng,
                geohash = EXCLUDED.geohash,
                stream_session_id = EXCLUDED.stream_session_id,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at",
        )
        .bind(event.id)
        .bind(event.scene_id)
        .bind(&event.name)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.canceled)
        .bind(event.allow_precise)
        .bind(event.precise_point.map(|p| p.lat))
        .bind(event.precise_point.map(|p| p.lng))
        .bind(event.geohash.as_str())
        .bind(event.stream_session_id)
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> SceneRepositoryResult<Option<SceneEvent>> {
        let row: Option<SceneEventRow> = sqlx::query_as(
            "SELECT id, scene_id, name, starts_at, ends_at, canceled, allow_precise,
                    precise_lat, precise_lng, geohash, stream_session_id,
                    created_at, updated_at, deleted_at
             FROM scene_events WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SceneEventRow::into_entity).transpose()
    }
}

#[derive(FromRow)]
struct SceneEventRow {
    id: Uuid,
    scene_id: Uuid,
    name: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    canceled: bool,
    allow_precise: bool,
    precise_lat: Option<f64>,
    precise_lng: Option<f64>,
    geohash: String,
    stream_session_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl SceneEventRow {
    fn into_entity(self) -> Result<SceneEvent, AppError> {
        let precise_point = match (self.precise_lat, self.precise_lng) {
            (Some(lat), Some(lng)) => Some(
                GeoPoint::new(lat, lng)
                    .map_err(|e| AppError::Integrity(format!("stored point invalid: {e}")))?,
            ),
            _ => None,
        };
        Ok(SceneEvent {
            id: self.id,
            scene_id: self.scene_id,
            name: self.name,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            canceled: self.canceled,
            allow_precise: self.allow_precise,
            precise_point,
            geohash: Geohash::parse(self.geohash)
                .map_err(|e| AppError::Integrity(format!("stored geohash invalid: {e}")))?,
            stream_session_id: self.stream_session_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct AllianceRow {
    id: Uuid,
    from_scene_id: Uuid,
    to_scene_id: Uuid,
    weight: f64,
    status: String,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl AllianceRow {
    fn into_entity(self) -> Result<Alliance, AppError> {
        Ok(Alliance {
            id: self.id,
            from_scene_id: self.from_scene_id,
            to_scene_id: self.to_scene_id,
            weight: AllianceWeight::new(self.weight)?,
            status: AllianceStatus::parse(&self.status)?,
            reason: self.reason.map(AllianceReason::new).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

pub struct PostgresAllianceRepository {
    pool: PgPool,
}

impl PostgresAllianceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllianceRepository for PostgresAllianceRepository {
    async fn upsert(&self, alliance: &Alliance) -> SceneRepositoryResult<Alliance> {
        let row: AllianceRow = sqlx::query_as(
            "INSERT INTO alliances (
                id, from_scene_id, to_scene_id, weight, status, reason,
                created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)
            ON CONFLICT (from_scene_id, to_scene_id) DO UPDATE SET
                weight = EXCLUDED.weight,
                reason = EXCLUDED.reason,
                status = 'active',
                deleted_at = NULL,
                updated_at = EXCLUDED.updated_at
            RETURNING id, from_scene_id, to_scene_id, weight, status, reason,
                      created_at, updated_at, deleted_at",
        )
        .bind(alliance.id)
        .bind(alliance.from_scene_id)
        .bind(alliance.to_scene_id)
        .bind(alliance.weight.value())
        .bind(alliance.status.as_str())
        .bind(alliance.reason.as_ref().map(|r| r.as_str()))
        .bind(alliance.created_at)
        .bind(alliance.updated_at)
        .fetch_one(&self.pool)
        .await?;
        row.into_entity()
    }

    async fn find_by_id(&self, id: Uuid) -> SceneRepositoryResult<Option<Alliance>> {
        let row: Option<AllianceRow> = sqlx::query_as(
            "SELECT id, from_scene_id, to_scene_id, weight, status, reason,
                    created_at, updated_at, deleted_at
             FROM alliances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AllianceRow::into_entity).transpose()
    }

    async fn update(&self, alliance: &Alliance) -> SceneRepositoryResult<()> {
        sqlx::query(
            "UPDATE alliances SET
                weight = $1, status = $2, reason = $3, updated_at = $4, deleted_at = $5
             WHERE id = $6",
        )
        .bind(alliance.weight.value())
        .bind(alliance.status.as_str())
        .bind(alliance.reason.as_ref().map(|r| r.as_str()))
        .bind(alliance.updated_at)
        .bind(alliance.deleted_at)
        .bind(alliance.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_outbound(&self, from_scene_id: Uuid) -> SceneRepositoryResult<Vec<Alliance>> {
        let rows: Vec<AllianceRow> = sqlx::query_as(
            "SELECT id, from_scene_id, to_scene_id, weight, status, reason,
                    created_at, updated_at, deleted_at
             FROM alliances WHERE from_scene_id = $1",
        )
        .bind(from_scene_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AllianceRow::into_entity).collect()
    }
}

#[derive(FromRow)]
struct MembershipRow {
    id: Uuid,
    scene_id: Uuid,
    member_did: String,
    role: String,
    trust_weight: f64,
    created_at: DateTime<Utc>,
}

pub struct PostgresMembershipRepository {
    pool: PgPool,
}

impl PostgresMembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PostgresMembershipRepository {
    async fn save(&self, membership: &Membership) -> SceneRepositoryResult<()> {
        sqlx::query(
            "INSERT INTO memberships (id, scene_id, member_did, role, trust_weight, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET role = EXCLUDED.role, trust_weight = EXCLUDED.trust_weight",
        )
        .bind(membership.id)
        .bind(membership.scene_id)
        .bind(membership.member_did.as_str())
        .bind(membership.role.as_str())
        .bind(membership.trust_weight.value())
        .bind(membership.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_scene(&self, scene_id: Uuid) -> SceneRepositoryResult<Vec<Membership>> {
        let rows: Vec<MembershipRow> = sqlx::query_as(
            "SELECT id, scene_id, member_did, role, trust_weight, created_at
             FROM memberships WHERE scene_id = $1",
        )
        .bind(scene_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Membership {
                    id: row.id,
                    scene_id: row.scene_id,
                    member_did: Did::new(row.member_did)
                        .map_err(|e| AppError::Integrity(format!("stored DID invalid: {e}")))?,
                    role: MembershipRole::parse(&row.role)?,
                    trust_weight: TrustWeight::new(row.trust_weight)?,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

pub struct PostgresTrustScoreRepository {
    pool: PgPool,
}

impl PostgresTrustScoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrustScoreRepository for PostgresTrustScoreRepository {
    async fn upsert(&self, score: &TrustScore) -> SceneRepositoryResult<()> {
        sqlx::query(
            "INSERT INTO trust_scores (scene_id, score, last_updated)
             VALUES ($1, $2, $3)
             ON CONFLICT (scene_id) DO UPDATE SET
                score = EXCLUDED.score, last_updated = EXCLUDED.last_updated",
        )
        .bind(score.scene_id)
        .bind(score.score)
        .bind(score.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, scene_id: Uuid) -> SceneRepositoryResult<Option<TrustScore>> {
        let row: Option<(Uuid, f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT scene_id, score, last_updated FROM trust_scores WHERE scene_id = $1",
        )
        .bind(scene_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(scene_id, score, last_updated)| TrustScore {
            scene_id,
            score,
            last_updated,
        }))
    }
}
