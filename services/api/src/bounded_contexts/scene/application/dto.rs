use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bounded_contexts::scene::domain::entities::Alliance;
use crate::bounded_contexts::scene::domain::services::TrustBreakdown;

#[derive(Debug, Deserialize)]
pub struct CreateAllianceRequest {
    pub from_scene_id: Uuid,
    pub to_scene_id: Uuid,
    pub weight: f64,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAllianceRequest {
    pub weight: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AllianceResponse {
    pub id: Uuid,
    pub from_scene_id: Uuid,
    pub to_scene_id: Uuid,
    pub weight: f64,
    pub status: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Alliance> for AllianceResponse {
    fn from(alliance: &Alliance) -> Self {
        Self {
            id: alliance.id,
            from_scene_id: alliance.from_scene_id,
            to_scene_id: alliance.to_scene_id,
            weight: alliance.weight.value(),
            status: alliance.status.as_str().to_string(),
            reason: alliance.reason.as_ref().map(|r| r.as_str().to_string()),
            created_at: alliance.created_at,
            updated_at: alliance.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrustResponse {
    pub scene_id: Uuid,
    pub trust_score: f64,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<TrustBreakdown>,
}
