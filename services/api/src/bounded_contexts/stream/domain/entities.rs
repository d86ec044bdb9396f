use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use subcults_types::{Did, Geohash};

use super::value_objects::{ParticipantEventType, ParticipantId};

/// Parent aggregate of a live audio room; exactly one of scene or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamParent {
    Scene(Uuid),
    Event(Uuid),
}

impl StreamParent {
    pub fn scene_id(&self) -> Option<Uuid> {
        match self {
            StreamParent::Scene(id) => Some(*id),
            StreamParent::Event(_) => None,
        }
    }

    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            StreamParent::Scene(_) => None,
            StreamParent::Event(id) => Some(*id),
        }
    }
}

/// A live audio room. At most one active session exists per parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: Uuid,
    pub scene_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub room_name: String,
    /// Denormalized; kept consistent with the participant table inside the
    /// join/leave transaction. Repair: SET count = COUNT(*) WHERE left_at IS NULL.
    pub active_participant_count: i32,
    pub locked: bool,
    pub featured_participant_id: Option<ParticipantId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    pub fn new(parent: StreamParent, room_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            scene_id: parent.scene_id(),
            event_id: parent.event_id(),
            room_name,
            active_participant_count: 0,
            locked: false,
            featured_participant_id: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// One connection span of a logical participant. A reconnect closes the old
/// row and opens a new one with a bumped `reconnection_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub participant_id: ParticipantId,
    pub user_did: Did,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub reconnection_count: i32,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Append-only record deriving post-mortem analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_did: Did,
    pub event_type: ParticipantEventType,
    /// 4-char geohash prefix, if the client shared one.
    pub geo_prefix: Option<Geohash>,
    pub occurred_at: DateTime<Utc>,
}

/// One-to-one with an ended session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamAnalytics {
    pub session_id: Uuid,
    pub peak_concurrent: i32,
    pub unique_participants: i32,
    pub total_joins: i32,
    pub duration_seconds: i64,
    pub engagement_lag_seconds: Option<i64>,
    pub mean_listen_seconds: Option<f64>,
    pub median_listen_seconds: Option<f64>,
    pub geographic_distribution: HashMap<String, i64>,
}
