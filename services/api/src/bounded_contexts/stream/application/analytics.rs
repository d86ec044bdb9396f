use std::collections::{HashMap, HashSet};

use crate::bounded_contexts::stream::domain::entities::{
    ParticipantEvent, StreamAnalytics, StreamSession,
};
use crate::bounded_contexts::stream::domain::value_objects::ParticipantEventType;

/// Fold the append-only event log of an ended session into its analytics row.
/// Events must be in chronological order; participants still connected when
/// the session ended are excluded from retention stats.
pub fn compute_analytics(session: &StreamSession, events: &[ParticipantEvent]) -> StreamAnalytics {
    let ended_at = session.ended_at.unwrap_or_else(chrono::Utc::now);

    let mut concurrent: i32 = 0;
    let mut peak_concurrent: i32 = 0;
    let mut total_joins: i32 = 0;
    let mut unique = HashSet::new();
    let mut first_join = None;
    let mut open_joins: HashMap<&str, chrono::DateTime<chrono::Utc>> = HashMap::new();
    let mut listen_seconds: Vec<f64> = Vec::new();
    let mut geographic_distribution: HashMap<String, i64> = HashMap::new();

    for event in events {
        match event.event_type {
            ParticipantEventType::Join => {
                concurrent += 1;
                peak_concurrent = peak_concurrent.max(concurrent);
                total_joins += 1;
                unique.insert(event.user_did.as_str());
                first_join.get_or_insert(event.occurred_at);
                open_joins.insert(event.user_did.as_str(), event.occurred_at);
                if let Some(prefix) = &event.geo_prefix {
                    *geographic_distribution
                        .entry(prefix.as_str().to_string())
                        .or_insert(0) += 1;
                }
            }
            ParticipantEventType::Leave => {
                concurrent = (concurrent - 1).max(0);
                if let Some(joined_at) = open_joins.remove(event.user_did.as_str()) {
                    let span = (event.occurred_at - joined_at).num_milliseconds() as f64 / 1000.0;
                    listen_seconds.push(span.max(0.0));
                }
            }
        }
    }

    let mean_listen_seconds = if listen_seconds.is_empty() {
        None
    } else {
        Some(listen_seconds.iter().sum::<f64>() / listen_seconds.len() as f64)
    };

    let median_listen_seconds = if listen_seconds.is_empty() {
        None
    } else {
        let mut sorted = listen_seconds.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        })
    };

    StreamAnalytics {
        session_id: session.id,
        peak_concurrent,
        unique_participants: unique.len() as i32,
        total_joins,
        duration_seconds: (ended_at - session.started_at).num_seconds(),
        engagement_lag_seconds: first_join.map(|t| (t - session.started_at).num_seconds()),
        mean_listen_seconds,
        median_listen_seconds,
        geographic_distribution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_contexts::stream::domain::entities::StreamParent;
    use chrono::{Duration, Utc};
    use subcults_types::{Did, Geohash};
    use uuid::Uuid;

    fn session() -> StreamSession {
        let mut session = StreamSession::new(StreamParent::Scene(Uuid::new_v4()), "room".into());
        session.started_at = Utc::now() - Duration::seconds(600);
        session.ended_at = Some(session.started_at + Duration::seconds(600));
        session
    }

    fn event(
        session: &StreamSession,
        did: &str,
        event_type: ParticipantEventType,
        offset_secs: i64,
        prefix: Option<&str>,
    ) -> ParticipantEvent {
        ParticipantEvent {
            id: Uuid::new_v4(),
            session_id: session.id,
            user_did: Did::new(did).unwrap(),
            event_type,
            geo_prefix: prefix.map(|p| Geohash::parse(p).unwrap()),
            occurred_at: session.started_at + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn empty_log_yields_zeroes() {
        let session = session();
        let analytics = compute_analytics(&session, &[]);
        assert_eq!(analytics.peak_concurrent, 0);
        assert_eq!(analytics.unique_participants, 0);
        assert_eq!(analytics.total_joins, 0);
        assert_eq!(analytics.duration_seconds, 600);
        assert!(analytics.engagement_lag_seconds.is_none());
        assert!(analytics.mean_listen_seconds.is_none());
        assert!(analytics.geographic_distribution.is_empty());
    }

    #[test]
    fn computes_peak_unique_and_lag() {
        let session = session();
        use ParticipantEventType::{Join, Leave};
        let events = vec![
            event(&session, "did:plc:a", Join, 30, Some("u4pr")),
            event(&session, "did:plc:b", Join, 60, Some("u4pr")),
            event(&session, "did:plc:a", Leave, 90, None),
            // a reconnects, raising total joins but not unique count
            event(&session, "did:plc:a", Join, 120, Some("ezs4")),
            event(&session, "did:plc:c", Join, 150, None),
            event(&session, "did:plc:b", Leave, 300, None),
            event(&session, "did:plc:a", Leave, 420, None),
            event(&session, "did:plc:c", Leave, 480, None),
        ];
        let analytics = compute_analytics(&session, &events);

        assert_eq!(analytics.peak_concurrent, 3);
        assert_eq!(analytics.unique_participants, 3);
        assert_eq!(analytics.total_joins, 4);
        assert_eq!(analytics.engagement_lag_seconds, Some(30));
        assert_eq!(analytics.geographic_distribution["u4pr"], 2);
        assert_eq!(analytics.geographic_distribution["ezs4"], 1);

        // listen spans: a 60, b 240, a 300, c 330 -> mean 232.5, median 270
        assert!((analytics.mean_listen_seconds.unwrap() - 232.5).abs() < 1e-9);
        assert!((analytics.median_listen_seconds.unwrap() - 270.0).abs() < 1e-9);
    }

    #[test]
    fn still_active_participants_excluded_from_retention() {
        let session = session();
        use ParticipantEventType::Join;
        let events = vec![event(&session, "did:plc:a", Join, 10, None)];
        let analytics = compute_analytics(&session, &events);
        assert!(analytics.mean_listen_seconds.is_none());
        assert_eq!(analytics.peak_concurrent, 1);
        assert_eq!(analytics.engagement_lag_seconds, Some(10));
    }
}
