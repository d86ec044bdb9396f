use futures_util::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::shared::infrastructure::metrics::Metrics;

use crate::bounded_contexts::firehose::domain::{
    commit::{CommitFrame, CommitOperation, IndexedRecord},
    cursor::Cursor,
    repository::{CursorRepository, RecordRepository},
};

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BACKOFF_JITTER: f64 = 0.5;
const CURSOR_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub firehose_url: String,
    pub queue_capacity: usize,
    pub max_retry_attempts: u32,
}

impl IndexerConfig {
    pub fn new(firehose_url: String) -> Self {
        Self {
            firehose_url,
            queue_capacity: 2000,
            max_retry_attempts: 5,
        }
    }
}

/// Durable, resumable consumer of the commit stream. A bounded queue sits
/// between the socket reader and the processor; a full queue blocks the
/// reader, pushing backpressure into the WebSocket.
pub struct Indexer {
    records: Arc<dyn RecordRepository>,
    cursors: Arc<dyn CursorRepository>,
    cursor: Cursor,
    metrics: Arc<Metrics>,
    config: IndexerConfig,
}

impl Indexer {
    pub async fn new(
        records: Arc<dyn RecordRepository>,
        cursors: Arc<dyn CursorRepository>,
        metrics: Arc<Metrics>,
        config: IndexerConfig,
    ) -> Result<Self, crate::shared::domain::errors::AppError> {
        let persisted = cursors.load().await?.unwrap_or(0);
        metrics.indexer_cursor.set(persisted);
        Ok(Self {
            records,
            cursors,
            cursor: Cursor::new(persisted),
            metrics,
            config,
        })
    }

    /// Resume URL: the server replays from the message after `cursor`.
    pub fn connect_url(&self) -> String {
        let cursor = self.cursor.get();
        if cursor > 0 {
            format!("{}?cursor={cursor}", self.config.firehose_url)
        } else {
            self.config.firehose_url.clone()
        }
    }

    pub fn cursor_value(&self) -> i64 {
        self.cursor.get()
    }

    /// Blocks until shutdown flips; never exits on message-level errors.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel::<CommitFrame>(self.config.queue_capacity);

        let processor = tokio::spawn(self.clone().process_queue(rx));
        let flusher = tokio::spawn(self.clone().flush_cursor_loop(shutdown.clone()));

        self.read_loop(tx, shutdown).await;

        // Reader is done and the sender dropped: the processor drains what is
        // queued, bounded by the shutdown deadline.
        if tokio::time::timeout(SHUTDOWN_DRAIN_DEADLINE, processor)
            .await
            .is_err()
        {
            tracing::warn!("indexer queue drain exceeded shutdown deadline");
        }
        flusher.abort();
        if let Err(e) = self.cursors.persist(self.cursor.get()).await {
            tracing::error!(error = %e, "final cursor persist failed");
        }
        tracing::info!(cursor = self.cursor.get(), "indexer stopped");
    }

    async fn read_loop(&self, tx: mpsc::Sender<CommitFrame>, mut shutdown: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }

            let url = self.connect_url();
            match connect_async(url.as_str()).await {
                Ok((mut stream, _)) => {
                    tracing::info!(url = %url, "firehose connected");
                    attempts = 0;

                    loop {
                        tokio::select! {
                            message = stream.next() => {
                                match message {
                                    Some(Ok(Message::Binary(bytes))) => {
                                        match CommitFrame::decode(&bytes) {
                                            Ok(frame) => {
                                                // Blocks when the queue is full.
                                                if tx.send(frame).await.is_err() {
                                                    return;
                                                }
                                                self.metrics.indexer_pending_messages.inc();
                                            }
                                            Err(e) => {
                                                tracing::warn!(error = %e, "dropping undecodable frame");
                                                self.metrics.indexer_validation_failures_total.inc();
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_))) => {}
                                    Some(Ok(Message::Close(_))) | None => {
                                        tracing::info!("firehose closed the connection");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        tracing::warn!(error = %e, "firehose read error");
                                        break;
                                    }
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "firehose connect failed");
                }
            }

            attempts += 1;
            self.metrics.indexer_reconnects_total.inc();
            if attempts >= self.config.max_retry_attempts {
                // Alert-level: reconnection continues regardless.
                tracing::error!(attempts, "firehose connection failing repeatedly");
            }

            let delay = backoff_delay(attempts);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn process_queue(self: Arc<Self>, mut rx: mpsc::Receiver<CommitFrame>) {
        while let Some(frame) = rx.recv().await {
            self.metrics.indexer_pending_messages.dec();
            self.process_frame(&frame).await;
        }
    }

    /// Apply one frame. The cursor advances on success and on skip-by-design
    /// (inadmissible, invalid, duplicate); it does not advance on transient
    /// persistence errors so replay redelivers the message.
    pub async fn process_frame(&self, frame: &CommitFrame) {
        if !frame.is_admitted() {
            self.advance(frame.time_us);
            return;
        }

        let fingerprint = frame.fingerprint();
        match self.records.fingerprint_exists(&fingerprint).await {
            Ok(true) => {
                self.metrics.indexer_duplicates_total.inc();
                self.advance(frame.time_us);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "fingerprint lookup failed; message will replay");
                return;
            }
        }

        match frame.operation {
            CommitOperation::Delete => {
                match self
                    .records
                    .delete(&frame.did, &frame.collection, &frame.rkey)
                    .await
                {
                    Ok(()) => {
                        self.metrics.indexer_processed_total.inc();
                        self.advance(frame.time_us);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "delete failed; message will replay");
                    }
                }
            }
            CommitOperation::Create | CommitOperation::Update => {
                let record = match frame.validate_record() {
                    Ok(record) => record,
                    Err(e) => {
                        // Persistent validation failure: skip on resume.
                        tracing::warn!(
                            collection = %frame.collection,
                            rkey = %frame.rkey,
                            error = %e,
                            "record failed validation"
                        );
                        self.metrics.indexer_validation_failures_total.inc();
                        self.advance(frame.time_us);
                        return;
                    }
                };
                match self
                    .records
                    .upsert(&IndexedRecord::from_frame(frame, record))
                    .await
                {
                    Ok(()) => {
                        self.metrics.indexer_processed_total.inc();
                        self.advance(frame.time_us);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upsert failed; message will replay");
                    }
                }
            }
        }
    }

    fn advance(&self, time_us: i64) {
        if self.cursor.advance_to(time_us) {
            self.metrics.indexer_cursor.set(self.cursor.get());
        }
    }

    async fn flush_cursor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(CURSOR_FLUSH_INTERVAL);
        let mut last_persisted = self.cursor.get();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = self.cursor.get();
                    if current != last_persisted {
                        match self.cursors.persist(current).await {
                            Ok(()) => last_persisted = current,
                            Err(e) => tracing::warn!(error = %e, "cursor persist failed"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// `min(base * 2^attempts, max)` with ±50% jitter.
pub fn backoff_delay(attempts: u32) -> Duration {
    let exp = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempts.min(16)))
        .min(BACKOFF_MAX);
    let jitter = rand::thread_rng().gen_range(1.0 - BACKOFF_JITTER..=1.0 + BACKOFF_JITTER);
    exp.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_contexts::firehose::infrastructure::repositories::in_memory::{
        InMemoryCursorRepository, InMemoryRecordRepository,
    };
    use ciborium::Value;

    fn frame(rkey: &str, rev: &str, op: CommitOperation, time_us: i64) -> CommitFrame {
        CommitFrame {
            did: "did:plc:writer".into(),
            collection: "net.subcults.scene".into(),
            rkey: rkey.into(),
            rev: rev.into(),
            operation: op,
            record: Some(Value::Map(vec![
                (Value::Text("name".into()), Value::Text("Bunker".into())),
                (Value::Text("geohash".into()), Value::Text("u33db2".into())),
            ])),
            time_us,
        }
    }

    async fn indexer() -> (Arc<Indexer>, Arc<InMemoryRecordRepository>, Arc<InMemoryCursorRepository>) {
        let records = Arc::new(InMemoryRecordRepository::new());
        let cursors = Arc::new(InMemoryCursorRepository::new());
        let indexer = Indexer::new(
            records.clone(),
            cursors.clone(),
            Arc::new(Metrics::new()),
            IndexerConfig::new("wss://firehose.example.test/commits".into()),
        )
        .await
        .unwrap();
        (Arc::new(indexer), records, cursors)
    }

    #[tokio::test]
    async fn processes_and_advances_cursor() {
        let (indexer, records, _) = indexer().await;
        for (i, time_us) in [100i64, 200, 300].iter().enumerate() {
            indexer
                .process_frame(&frame(&format!("rkey{i}"), "rev1", CommitOperation::Create, *time_us))
                .await;
        }
        assert_eq!(indexer.cursor_value(), 300);
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn resume_url_carries_cursor() {
        let (indexer, _, cursors) = indexer().await;
        indexer
            .process_frame(&frame("rkey1", "rev1", CommitOperation::Create, 200))
            .await;
        assert_eq!(
            indexer.connect_url(),
            "wss://firehose.example.test/commits?cursor=200"
        );

        // A restart resumes from the persisted cursor.
        cursors.persist(indexer.cursor_value()).await.unwrap();
        let restarted = Indexer::new(
            Arc::new(InMemoryRecordRepository::new()),
            cursors,
            Arc::new(Metrics::new()),
            IndexerConfig::new("wss://firehose.example.test/commits".into()),
        )
        .await
        .unwrap();
        assert_eq!(restarted.cursor_value(), 200);
        assert!(restarted.connect_url().ends_with("cursor=200"));
    }

    #[tokio::test]
    async fn duplicate_fingerprint_short_circuits() {
        let (indexer, records, _) = indexer().await;
        let first = frame("rkey1", "rev1", CommitOperation::Create, 100);
        indexer.process_frame(&first).await;
        indexer.process_frame(&first).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records.upsert_count(), 1);

        // A new rev for the same key is a fresh operation.
        indexer
            .process_frame(&frame("rkey1", "rev2", CommitOperation::Update, 150))
            .await;
        assert_eq!(records.upsert_count(), 2);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_still_advances_cursor() {
        let (indexer, records, _) = indexer().await;
        let mut bad = frame("rkey1", "rev1", CommitOperation::Create, 500);
        bad.record = Some(Value::Map(vec![(
            Value::Text("geohash".into()),
            Value::Text("u33db2".into()),
        )]));
        indexer.process_frame(&bad).await;
        assert_eq!(records.len(), 0);
        assert_eq!(indexer.cursor_value(), 500);
    }

    #[tokio::test]
    async fn foreign_collections_are_skipped() {
        let (indexer, records, _) = indexer().await;
        let mut foreign = frame("rkey1", "rev1", CommitOperation::Create, 700);
        foreign.collection = "app.other.thing".into();
        indexer.process_frame(&foreign).await;
        assert_eq!(records.len(), 0);
        assert_eq!(indexer.cursor_value(), 700);
    }

    #[tokio::test]
    async fn transient_persistence_error_does_not_advance() {
        let (indexer, records, _) = indexer().await;
        records.fail_next_upsert();
        indexer
            .process_frame(&frame("rkey1", "rev1", CommitOperation::Create, 900))
            .await;
        assert_eq!(indexer.cursor_value(), 0);

        // Replay after the fault clears succeeds and advances.
        indexer
            .process_frame(&frame("rkey1", "rev1", CommitOperation::Create, 900))
            .await;
        assert_eq!(indexer.cursor_value(), 900);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let (indexer, records, _) = indexer().await;
        indexer
            .process_frame(&frame("rkey1", "rev1", CommitOperation::Create, 100))
            .await;
        indexer
            .process_frame(&frame("rkey1", "rev2", CommitOperation::Delete, 200))
            .await;
        assert_eq!(records.len(), 0);
        assert_eq!(indexer.cursor_value(), 200);
    }

    #[test]
    fn backoff_is_bounded_with_jitter() {
        for attempts in 0..20 {
            let delay = backoff_delay(attempts);
            assert!(delay <= BACKOFF_MAX.mul_f64(1.0 + BACKOFF_JITTER));
        }
        // Early attempts stay near the base.
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(300));
    }
}
