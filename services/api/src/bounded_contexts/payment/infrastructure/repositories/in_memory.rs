use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::shared::domain::errors::AppError;

use crate::bounded_contexts::payment::domain::{
    entities::{IdempotencyRecord, PaymentRecord, WebhookEventRecord},
    repository::{
        IdempotencyKeyRepository, PaymentRepository, PaymentRepositoryResult,
        WebhookEventRepository,
    },
};

pub struct InMemoryPaymentRepository {
    payments: Mutex<HashMap<String, PaymentRecord>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self {
            payments: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPaymentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &PaymentRecord) -> PaymentRepositoryResult<()> {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        if payments.contains_key(&payment.session_id) {
            return Err(AppError::Conflict(
                "payment already exists for session".to_string(),
            ));
        }
        payments.insert(payment.session_id.clone(), payment.clone());
        Ok(())
    }

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> PaymentRepositoryResult<Option<PaymentRecord>> {
        Ok(self
            .payments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned())
    }

    async fn update(&self, payment: &PaymentRecord) -> PaymentRepositoryResult<()> {
        self.payments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(payment.session_id.clone(), payment.clone());
        Ok(())
    }
}

pub struct InMemoryWebhookEventRepository {
    events: Mutex<HashMap<String, WebhookEventRecord>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryWebhookEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn exists(&self, external_event_id: &str) -> PaymentRepositoryResult<bool> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(external_event_id))
    }

    async fn insert(&self, event: &WebhookEventRecord) -> PaymentRepositoryResult<()> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.contains_key(&event.external_event_id) {
            return Err(AppError::Conflict("event already processed".to_string()));
        }
        events.insert(event.external_event_id.clone(), event.clone());
        Ok(())
    }
}

pub struct InMemoryIdempotencyKeyRepository {
    records: Mutex<HashMap<(String, String, String), IdempotencyRecord>>,
}

impl InMemoryIdempotencyKeyRepository {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIdempotencyKeyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyKeyRepository for InMemoryIdempotencyKeyRepository {
    async fn find(
        &self,
        key: &str,
        method: &str,
        route: &str,
    ) -> PaymentRepositoryResult<Option<IdempotencyRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(key.to_string(), method.to_string(), route.to_string()))
            .cloned())
    }

    async fn insert(&self, record: &IdempotencyRecord) -> PaymentRepositoryResult<()> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).insert(
            (
                record.key.clone(),
                record.method.clone(),
                record.route.clone(),
            ),
            record.clone(),
        );
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PaymentRepositoryResult<u64> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
