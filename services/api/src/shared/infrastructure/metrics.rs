use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};

/// Process-wide metric registry. Component counters live here so the indexer,
/// trust job and broadcaster can record without knowing about HTTP.
pub struct Metrics {
    registry: Registry,

    // Firehose indexer
    pub indexer_pending_messages: IntGauge,
    pub indexer_processed_total: IntCounter,
    pub indexer_validation_failures_total: IntCounter,
    pub indexer_duplicates_total: IntCounter,
    pub indexer_reconnects_total: IntCounter,
    pub indexer_cursor: IntGauge,

    // Trust recompute
    pub trust_scenes_processed_total: IntCounter,
    pub trust_recompute_failures_total: IntCounter,
    pub trust_cycle_duration_seconds: Histogram,
    pub trust_last_recompute_timestamp: IntGauge,

    // Stream broadcast
    pub broadcast_messages_total: IntCounter,
    pub broadcast_dropped_connections_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let indexer_pending_messages = IntGauge::new(
            "indexer_pending_messages",
            "Messages buffered between firehose reader and processor",
        )
        .unwrap();
        let indexer_processed_total = IntCounter::new(
            "indexer_processed_total",
            "Firehose operations applied to the store",
        )
        .unwrap();
        let indexer_validation_failures_total = IntCounter::new(
            "indexer_validation_failures_total",
            "Records rejected by schema validation",
        )
        .unwrap();
        let indexer_duplicates_total = IntCounter::new(
            "indexer_duplicates_total",
            "Operations short-circuited by fingerprint dedup",
        )
        .unwrap();
        let indexer_reconnects_total =
            IntCounter::new("indexer_reconnects_total", "Firehose reconnect attempts").unwrap();
        let indexer_cursor = IntGauge::new(
            "indexer_cursor_time_us",
            "Last processed firehose sequence (microseconds)",
        )
        .unwrap();

        let trust_scenes_processed_total = IntCounter::new(
            "trust_scenes_processed_total",
            "Scenes recomputed by the trust job",
        )
        .unwrap();
        let trust_recompute_failures_total = IntCounter::new(
            "trust_recompute_failures_total",
            "Scene recomputations that failed and stayed dirty",
        )
        .unwrap();
        let trust_cycle_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "trust_cycle_duration_seconds",
            "Wall time of one trust recompute cycle",
        ))
        .unwrap();
        let trust_last_recompute_timestamp = IntGauge::new(
            "trust_last_recompute_timestamp",
            "Unix timestamp of the last completed recompute cycle",
        )
        .unwrap();

        let broadcast_messages_total = IntCounter::new(
            "broadcast_messages_total",
            "Participant events fanned out to subscribers",
        )
        .unwrap();
        let broadcast_dropped_connections_total = IntCounter::new(
            "broadcast_dropped_connections_total",
            "Subscriber connections pruned after a failed write",
        )
        .unwrap();

        for collector in [
            Box::new(indexer_pending_messages.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(indexer_processed_total.clone()),
            Box::new(indexer_validation_failures_total.clone()),
            Box::new(indexer_duplicates_total.clone()),
            Box::new(indexer_reconnects_total.clone()),
            Box::new(indexer_cursor.clone()),
            Box::new(trust_scenes_processed_total.clone()),
            Box::new(trust_recompute_failures_total.clone()),
            Box::new(trust_cycle_duration_seconds.clone()),
            Box::new(trust_last_recompute_timestamp.clone()),
            Box::new(broadcast_messages_total.clone()),
            Box::new(broadcast_dropped_connections_total.clone()),
        ] {
            registry.register(collector).unwrap();
        }

        Self {
            registry,
            indexer_pending_messages,
            indexer_processed_total,
            indexer_validation_failures_total,
            indexer_duplicates_total,
            indexer_reconnects_total,
            indexer_cursor,
            trust_scenes_processed_total,
            trust_recompute_failures_total,
            trust_cycle_duration_seconds,
            trust_last_recompute_timestamp,
            broadcast_messages_total,
            broadcast_dropped_connections_total,
        }
    }

    /// Prometheus text exposition of every registered collector.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_renders() {
        let metrics = Metrics::new();
        metrics.indexer_processed_total.inc();
        metrics.indexer_pending_messages.set(7);
        let out = metrics.render();
        assert!(out.contains("indexer_processed_total 1"));
        assert!(out.contains("indexer_pending_messages 7"));
    }
}
