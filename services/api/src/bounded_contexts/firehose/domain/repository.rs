use async_trait::async_trait;

use crate::shared::domain::errors::AppError;
use super::commit::IndexedRecord;

pub type FirehoseRepositoryResult<T> = Result<T, AppError>;

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Upsert keyed by `(did, collection, rkey)`.
    async fn upsert(&self, record: &IndexedRecord) -> FirehoseRepositoryResult<()>;

    async fn delete(
        &self,
        did: &str,
        collection: &str,
        rkey: &str,
    ) -> FirehoseRepositoryResult<()>;

    /// Has this operation's idempotency fingerprint been applied before?
    async fn fingerprint_exists(&self, fingerprint: &str) -> FirehoseRepositoryResult<bool>;
}

#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Single-row process-wide state.
    async fn load(&self) -> FirehoseRepositoryResult<Option<i64>>;
    async fn persist(&self, time_us: i64) -> FirehoseRepositoryResult<()>;
}
