use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::shared::domain::errors::AppError;
use super::entities::{IdempotencyRecord, PaymentRecord, WebhookEventRecord};

pub type PaymentRepositoryResult<T> = Result<T, AppError>;

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &PaymentRecord) -> PaymentRepositoryResult<()>;
    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> PaymentRepositoryResult<Option<PaymentRecord>>;
    async fn update(&self, payment: &PaymentRecord) -> PaymentRepositoryResult<()>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn exists(&self, external_event_id: &str) -> PaymentRepositoryResult<bool>;

    /// Unique on `external_event_id`; a concurrent duplicate insert fails.
    async fn insert(&self, event: &WebhookEventRecord) -> PaymentRepositoryResult<()>;
}

#[async_trait]
pub trait IdempotencyKeyRepository: Send + Sync {
    async fn find(
        &self,
        key: &str,
        method: &str,
        route: &str,
    ) -> PaymentRepositoryResult<Option<IdempotencyRecord>>;

    async fn insert(&self, record: &IdempotencyRecord) -> PaymentRepositoryResult<()>;

    /// Retention job: drop keys older than the cutoff, returning the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PaymentRepositoryResult<u64>;
}
