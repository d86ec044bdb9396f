use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use subcults_types::Did;

use crate::bounded_contexts::payment::domain::{
    entities::{IdempotencyRecord, PaymentRecord, WebhookEventRecord},
    repository::{
        IdempotencyKeyRepository, PaymentRepository, PaymentRepositoryResult,
        WebhookEventRepository,
    },
    value_objects::PaymentStatus,
};

#[derive(FromRow)]
struct PaymentRow {
    session_id: String,
    amount_minor: i64,
    fee_minor: i64,
    currency: String,
    user_did: String,
    scene_id: Uuid,
    event_id: Option<Uuid>,
    connected_account_id: Option<String>,
    payment_intent_id: Option<String>,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_entity(self) -> Result<PaymentRecord, AppError> {
        Ok(PaymentRecord {
            session_id: self.session_id,
            amount_minor: self.amount_minor,
            fee_minor: self.fee_minor,
            currency: self.currency,
            user_did: Did::new(self.user_did)
                .map_err(|e| AppError::Integrity(format!("stored DID invalid: {e}")))?,
            scene_id: self.scene_id,
            event_id: self.event_id,
            connected_account_id: self.connected_account_id,
            payment_intent_id: self.payment_intent_id,
            status: PaymentStatus::parse(&self.status)?,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, payment: &PaymentRecord) -> PaymentRepositoryResult<()> {
        let result = sqlx::query(
            "INSERT INTO payments (
                session_id, amount_minor, fee_minor, currency, user_did, scene_id,
                event_id, connected_account_id, payment_intent_id, status,
                failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&payment.session_id)
        .bind(payment.amount_minor)
        .bind(payment.fee_minor)
        .bind(&payment.currency)
        .bind(payment.user_did.as_str())
        .bind(payment.scene_id)
        .bind(payment.event_id)
        .bind(&payment.connected_account_id)
        .bind(&payment.payment_intent_id)
        .bind(payment.status.as_str())
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
                "payment already exists for session".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> PaymentRepositoryResult<Option<PaymentRecord>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT session_id, amount_minor, fee_minor, currency, user_did, scene_id,
                    event_id, connected_account_id, payment_intent_id, status,
                    failure_reason, created_at, updated_at
             FROM payments WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRow::into_entity).transpose()
    }

    async fn update(&self, payment: &PaymentRecord) -> PaymentRepositoryResult<()> {
        sqlx::query(
            "UPDATE payments SET
                amount_minor = $1, fee_minor = $2, currency = $3,
                payment_intent_id = $4, status = $5, failure_reason = $6, updated_at = $7
             WHERE session_id = $8",
        )
        .bind(payment.amount_minor)
        .bind(payment.fee_minor)
        .bind(&payment.currency)
        .bind(&payment.payment_intent_id)
        .bind(payment.status.as_str())
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(&payment.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn exists(&self, external_event_id: &str) -> PaymentRepositoryResult<bool> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM webhook_events WHERE external_event_id = $1)",
        )
        .bind(external_event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn insert(&self, event: &WebhookEventRecord) -> PaymentRepositoryResult<()> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (external_event_id, event_type, processed_at)
             VALUES ($1, $2, $3)",
        )
        .bind(&event.external_event_id)
        .bind(&event.event_type)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::Conflict("event already processed".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub struct PostgresIdempotencyKeyRepository {
    pool: PgPool,
}

impl PostgresIdempotencyKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyKeyRepository for PostgresIdempotencyKeyRepository {
    async fn find(
        &self,
        key: &str,
        method: &str,
        route: &str,
    ) -> PaymentRepositoryResult<Option<IdempotencyRecord>> {
        let row: Option<(String, String, String, i32, String, String, DateTime<Utc>)> =
            sqlx::query_as(
                "SELECT key, method, route, response_status, response_body, response_hash, created_at
                 FROM idempotency_keys WHERE key = $1 AND method = $2 AND route = $3",
            )
            .bind(key)
            .bind(method)
            .bind(route)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(key, method, route, response_status, response_body, response_hash, created_at)| {
                IdempotencyRecord {
                    key,
                    method,
                    route,
                    response_status: response_status as u16,
                    response_body,
                    response_hash,
                    created_at,
                }
            },
        ))
    }

    async fn insert(&self, record: &IdempotencyRecord) -> PaymentRepositoryResult<()> {
        sqlx::query(
            "INSERT INTO idempotency_keys (
                key, method, route, response_status, response_body, response_hash, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (key, method, route) DO NOTHING",
        )
        .bind(&record.key)
        .bind(&record.method)
        .bind(&record.route)
        .bind(record.response_status as i32)
        .bind(&record.response_body)
        .bind(&record.response_hash)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PaymentRepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
