use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::privacy::LocationConsent;
use subcults_types::{Did, GeoPoint, Geohash, PUBLIC_GEOHASH_PRECISION};

use super::value_objects::{
    AllianceReason, AllianceStatus, AllianceWeight, MembershipRole, TrustWeight, Visibility,
};

/// A curated location/community, the primary aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: Uuid,
    pub owner_did: Did,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    /// Consent flag guarding `precise_point`.
    pub allow_precise: bool,
    pub precise_point: Option<GeoPoint>,
    /// Coarse 6-char geohash, always present.
    pub geohash: Geohash,
    /// Payment-provider connected account, set by onboarding.
    pub connected_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Scene {
    pub fn new(owner_did: Did, name: String, point: GeoPoint, allow_precise: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_did,
            name,
            description: None,
            tags: Vec::new(),
            visibility: Visibility::Public,
            allow_precise,
            precise_point: allow_precise.then_some(point),
            geohash: Geohash::encode(point, PUBLIC_GEOHASH_PRECISION),
            connected_account_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Revoking consent drops the precise point; re-granting does not restore
    /// it, the owner must submit coordinates again.
    pub fn set_allow_precise(&mut self, allow: bool) {
        self.allow_precise = allow;
        if !allow {
            self.precise_point = None;
        }
        self.updated_at = Utc::now();
    }
}

impl LocationConsent for Scene {
    fn allow_precise(&self) -> bool {
        self.allow_precise
    }
    fn precise_point(&self) -> Option<GeoPoint> {
        self.precise_point
    }
    fn clear_precise_point(&mut self) {
        self.precise_point = None;
    }
}

/// A dated happening inside a scene. Shares the scene's privacy shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEvent {
    pub id: Uuid,
    pub scene_id: Uuid,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub canceled: bool,
    pub allow_precise: bool,
    pub precise_point: Option<GeoPoint>,
    pub geohash: Geohash,
    pub stream_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SceneEvent {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl LocationConsent for SceneEvent {
    fn allow_precise(&self) -> bool {
        self.allow_precise
    }
    fn precise_point(&self) -> Option<GeoPoint> {
        self.precise_point
    }
    fn clear_precise_point(&mut self) {
        self.precise_point = None;
    }
}

/// Directed trust edge between two scenes. Stored as a plain edge table;
/// cycles are legal and all reads are single-hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alliance {
    pub id: Uuid,
    pub from_scene_id: Uuid,
    pub to_scene_id: Uuid,
    pub weight: AllianceWeight,
    pub status: AllianceStatus,
    pub reason: Option<AllianceReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Alliance {
    pub fn new(
        from_scene_id: Uuid,
        to_scene_id: Uuid,
        weight: AllianceWeight,
        reason: Option<AllianceReason>,
    ) -> Result<Self, AppError> {
        if from_scene_id == to_scene_id {
            return Err(AppError::SelfAlliance);
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            from_scene_id,
            to_scene_id,
            weight,
            status: AllianceStatus::Active,
            reason,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Contributes to score computation only while active and not deleted.
    pub fn counts_for_score(&self) -> bool {
        self.status == AllianceStatus::Active && !self.is_deleted()
    }

    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

/// Role-weighted association of a DID with a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub scene_id: Uuid,
    pub member_did: Did,
    pub role: MembershipRole,
    pub trust_weight: TrustWeight,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn weighted_trust(&self) -> f64 {
        self.trust_weight.value() * self.role.multiplier()
    }
}

/// Cached per-scene aggregate, freely rebuildable from edges + memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub scene_id: Uuid,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
}
