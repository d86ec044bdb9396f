use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::bounded_contexts::stream::domain::entities::{Participant, StreamAnalytics};

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    /// Optional client-shared geohash; truncated to 4 chars before storage.
    pub geohash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub stream_session_id: Uuid,
    pub participant_id: String,
    pub joined_at: DateTime<Utc>,
    pub reconnection_count: i32,
    pub is_reconnection: bool,
    pub active_count: i32,
    /// Short-lived grant for the media plane, plus the room it opens.
    pub token: String,
    pub room_name: String,
}

impl JoinResponse {
    pub fn new(
        participant: &Participant,
        is_reconnection: bool,
        active_count: i32,
        token: String,
        room_name: String,
    ) -> Self {
        Self {
            stream_session_id: participant.session_id,
            participant_id: participant.participant_id.to_string(),
            joined_at: participant.joined_at,
            reconnection_count: participant.reconnection_count,
            is_reconnection,
            active_count,
            token,
            room_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub stream_session_id: Uuid,
    pub active_count: i32,
}

/// Public view: counts only, never identities.
#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub stream_session_id: Uuid,
    pub active_count: i32,
    pub locked: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub stream_session_id: Uuid,
    pub peak_concurrent: i32,
    pub unique_participants: i32,
    pub total_joins: i32,
    pub duration_seconds: i64,
    pub engagement_lag_seconds: Option<i64>,
    pub mean_listen_seconds: Option<f64>,
    pub median_listen_seconds: Option<f64>,
    pub geographic_distribution: HashMap<String, i64>,
}

impl From<StreamAnalytics> for AnalyticsResponse {
    fn from(analytics: StreamAnalytics) -> Self {
        Self {
            stream_session_id: analytics.session_id,
            peak_concurrent: analytics.peak_concurrent,
            unique_participants: analytics.unique_participants,
            total_joins: analytics.total_joins,
            duration_seconds: analytics.duration_seconds,
            engagement_lag_seconds: analytics.engagement_lag_seconds,
            mean_listen_seconds: analytics.mean_listen_seconds,
            median_listen_seconds: analytics.median_listen_seconds,
            geographic_distribution: analytics.geographic_distribution,
        }
    }
}
