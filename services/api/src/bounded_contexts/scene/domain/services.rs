use serde::Serialize;

use super::entities::{Alliance, Membership};

/// Informational score breakdown returned by the trust read API. Not a
/// faithful reconstruction of intermediate computation steps.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrustBreakdown {
    pub alliance_avg: f64,
    pub membership_avg: f64,
    pub alliance_count: usize,
    pub membership_count: usize,
}

/// score(S) = clamp(A × M, 0, 1) where A is the average weight of active
/// outbound alliances (1.0 when there are none) and M the average of
/// trust_weight × role multiplier over memberships (0.0 when there are none).
pub fn compute_trust_score(
    alliances: &[Alliance],
    memberships: &[Membership],
) -> (f64, Option<TrustBreakdown>) {
    if memberships.is_empty() {
        return (0.0, None);
    }

    let counted: Vec<f64> = alliances
        .iter()
        .filter(|a| a.counts_for_score())
        .map(|a| a.weight.value())
        .collect();
    let alliance_avg = if counted.is_empty() {
        1.0
    } else {
        counted.iter().sum::<f64>() / counted.len() as f64
    };

    let membership_avg = memberships
        .iter()
        .map(Membership::weighted_trust)
        .sum::<f64>()
        / memberships.len() as f64;

    let score = (alliance_avg * membership_avg).clamp(0.0, 1.0);
    (
        score,
        Some(TrustBreakdown {
            alliance_avg,
            membership_avg,
            alliance_count: counted.len(),
            membership_count: memberships.len(),
        }),
    )
}

/// Composite search ranking. The trust term is dampened and only applied when
/// the ranking flag is on; the other three terms come from the search layer.
pub fn composite_rank(
    text_match: f64,
    proximity: f64,
    recency: f64,
    trust_score: f64,
    trust_enabled: bool,
) -> f64 {
    let trust_weight = if trust_enabled { trust_score * 0.1 } else { 0.0 };
    0.4 * text_match + 0.3 * proximity + 0.2 * recency + 0.1 * trust_weight
}
