use chrono::{Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::audit::{AuditOutcome, AuditStore};
use crate::shared::infrastructure::config::Environment;
use subcults_types::Did;

use super::dto::{
    CheckoutItem, CheckoutRequest, CheckoutResponse, OnboardRequest, OnboardResponse,
    StatusResponse,
};
use crate::bounded_contexts::payment::domain::{
    entities::{IdempotencyRecord, PaymentRecord, WebhookEventRecord},
    repository::{IdempotencyKeyRepository, PaymentRepository, WebhookEventRepository},
    value_objects::{
        validate_redirect_url, FeePercent, IdempotencyKey, PaymentStatus,
        MAX_LINE_ITEM_QUANTITY,
    },
};
use crate::bounded_contexts::payment::infrastructure::gateway::{
    CheckoutLineItem, CheckoutSessionRequest, PaymentGateway,
};
use crate::bounded_contexts::payment::infrastructure::signature::verify_webhook_signature;
use crate::bounded_contexts::scene::domain::repository::SceneRepository;

const CHECKOUT_ROUTE: &str = "/payments/checkout";
const IDEMPOTENCY_RETENTION_HOURS: i64 = 24;

/// Terminal disposition of a webhook delivery. Everything except a signature
/// failure answers 200 to the provider.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event applied and its id recorded.
    Processed,
    /// Event id seen before; nothing done.
    Replay,
    /// Known-but-log-only or unknown type; no state change.
    Ignored,
    /// Processing failed after signature verification; the id is not
    /// recorded, so the provider's natural redelivery will retry.
    Failed,
}

#[derive(Debug, Deserialize)]
struct ProviderEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: ProviderEventData,
}

#[derive(Debug, Deserialize)]
struct ProviderEventData {
    object: ProviderObject,
}

#[derive(Debug, Deserialize)]
struct ProviderObject {
    id: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    last_payment_error: Option<ProviderPaymentError>,
    #[serde(default)]
    capabilities: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProviderPaymentError {
    message: Option<String>,
}

impl ProviderObject {
    /// Intent events reference our checkout session through metadata; the
    /// checkout.session.* family carries the session as the object itself.
    fn session_reference(&self) -> Option<String> {
        self.metadata
            .get("checkout_session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    webhook_events: Arc<dyn WebhookEventRepository>,
    idempotency_keys: Arc<dyn IdempotencyKeyRepository>,
    scenes: Arc<dyn SceneRepository>,
    gateway: Arc<dyn PaymentGateway>,
    audit: Arc<dyn AuditStore>,
    webhook_secret: String,
    fee_percent: FeePercent,
    environment: Environment,
    /// Linearizes transitions per external session id.
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        webhook_events: Arc<dyn WebhookEventRepository>,
        idempotency_keys: Arc<dyn IdempotencyKeyRepository>,
        scenes: Arc<dyn SceneRepository>,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<dyn AuditStore>,
        webhook_secret: String,
        fee_percent: FeePercent,
        environment: Environment,
    ) -> Self {
        Self {
            payments,
            webhook_events,
            idempotency_keys,
            scenes,
            gateway,
            audit,
            webhook_secret,
            fee_percent,
            environment,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_session(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn onboard(
        &self,
        actor: &Did,
        request: OnboardRequest,
    ) -> Result<OnboardResponse, AppError> {
        let mut scene = self
            .scenes
            .find_by_id(request.scene_id)
            .await?
            .ok_or(AppError::SceneNotFound)?;
        if &scene.owner_did != actor {
            return Err(AppError::Forbidden(
                "only the scene owner may onboard".to_string(),
            ));
        }
        validate_redirect_url(&request.refresh_url, &self.environment)?;
        validate_redirect_url(&request.return_url, &self.environment)?;

        let onboarding = self
            .gateway
            .create_connect_onboarding(
                scene.id,
                scene.connected_account_id.as_deref(),
                &request.refresh_url,
                &request.return_url,
            )
            .await?;

        scene.connected_account_id = Some(onboarding.account_id.clone());
        scene.updated_at = Utc::now();
        self.scenes.save(&scene).await?;

        self.audit
            .append(actor.as_str(), "payment.onboard", AuditOutcome::Success, None, None)
            .await?;

        Ok(OnboardResponse {
            scene_id: scene.id,
            connected_account_id: onboarding.account_id,
            onboarding_url: onboarding.url,
        })
    }

    /// Create a checkout session. Duplicate submissions under the same
    /// idempotency key replay the cached response verbatim.
    pub async fn create_checkout(
        &self,
        actor: &Did,
        raw_key: &str,
        request: CheckoutRequest,
    ) -> Result<(u16, CheckoutResponse), AppError> {
        let key = IdempotencyKey::new(raw_key)?;

        if let Some(cached) = self
            .idempotency_keys
            .find(key.as_str(), "POST", CHECKOUT_ROUTE)
            .await?
        {
            if (200..300).contains(&cached.response_status) {
                let body: CheckoutResponse =
                    serde_json::from_str(&cached.response_body).map_err(|e| {
                        AppError::Integrity(format!("cached idempotent response invalid: {e}"))
                    })?;
                tracing::debug!(key = %key.as_str(), "idempotency cache hit");
                return Ok((cached.response_status, body));
            }
        }

        let scene = self
            .scenes
            .find_by_id(request.scene_id)
            .await?
            .ok_or(AppError::SceneNotFound)?;
        let connected_account_id = scene.connected_account_id.clone().ok_or_else(|| {
            AppError::Validation("scene is not onboarded for payments".to_string())
        })?;

        validate_redirect_url(&request.success_url, &self.environment)?;
        validate_redirect_url(&request.cancel_url, &self.environment)?;

        if request.items.is_empty() {
            return Err(AppError::Validation("checkout requires line items".to_string()));
        }
        for item in &request.items {
            if item.quantity == 0 || item.quantity > MAX_LINE_ITEM_QUANTITY {
                return Err(AppError::Validation(format!(
                    "quantity must be between 1 and {MAX_LINE_ITEM_QUANTITY}"
                )));
            }
            if item.amount <= 0 {
                return Err(AppError::Validation("item amount must be positive".to_string()));
            }
        }

        let amount_minor: i64 = request
            .items
            .iter()
            .map(|i| i.amount * i64::from(i.quantity))
            .sum();
        let fee_minor = self.fee_percent.fee_for(amount_minor);

        let session = self
            .gateway
            .create_checkout_session(CheckoutSessionRequest {
                connected_account_id: connected_account_id.clone(),
                success_url: request.success_url,
                cancel_url: request.cancel_url,
                line_items: request
                    .items
                    .iter()
                    .map(|i| CheckoutLineItem {
                        name: i.name.clone(),
                        amount_minor: i.amount,
                        quantity: i.quantity,
                    })
                    .collect(),
                application_fee_minor: fee_minor,
                currency: request.currency.clone(),
                client_reference_id: actor.to_string(),
            })
            .await?;

        let now = Utc::now();
        let payment = PaymentRecord {
            session_id: session.session_id.clone(),
            amount_minor,
            fee_minor,
            currency: request.currency,
            user_did: actor.clone(),
            scene_id: request.scene_id,
            event_id: request.event_id,
            connected_account_id: Some(connected_account_id),
            payment_intent_id: None,
            status: PaymentStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.payments.insert(&payment).await?;

        let response = CheckoutResponse {
            session_id: payment.session_id.clone(),
            checkout_url: session.url,
            status: payment.status.to_string(),
            amount: amount_minor,
            fee: fee_minor,
            currency: payment.currency.clone(),
        };

        // Only 2xx responses are cached.
        let body = serde_json::to_string(&response)
            .map_err(|e| AppError::Internal(format!("response serialize failed: {e}")))?;
        self.idempotency_keys
            .insert(&IdempotencyRecord {
                key: key.as_str().to_string(),
                method: "POST".to_string(),
                route: CHECKOUT_ROUTE.to_string(),
                response_status: 201,
                response_hash: hex::encode(Sha256::digest(body.as_bytes())),
                response_body: body,
                created_at: now,
            })
            .await?;

        self.audit
            .append(actor.as_str(), "payment.checkout.create", AuditOutcome::Success, None, None)
            .await?;

        Ok((201, response))
    }

    /// Readable by the payment creator or the owner of the paid scene.
    pub async fn status(&self, actor: &Did, session_id: &str) -> Result<StatusResponse, AppError> {
        let payment = self
            .payments
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("payment does not exist".to_string()))?;

        if &payment.user_did != actor {
            let scene = self
                .scenes
                .find_by_id(payment.scene_id)
                .await?
                .ok_or(AppError::SceneNotFound)?;
            if &scene.owner_did != actor {
                return Err(AppError::Forbidden(
                    "payment status is restricted to its creator or the scene owner".to_string(),
                ));
            }
        }
        Ok(StatusResponse::from(&payment))
    }

    /// Webhook entry point. Signature failures surface as `AuthFailed` (the
    /// only 400); every verified delivery resolves to a 200-class outcome.
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, AppError> {
        verify_webhook_signature(&self.webhook_secret, raw_body, signature_header).map_err(
            |e| {
                tracing::warn!(error = %e, "webhook signature rejected");
                e
            },
        )?;

        let event: ProviderEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "webhook payload unparseable");
                return Ok(WebhookOutcome::Failed);
            }
        };

        if self.webhook_events.exists(&event.id).await? {
            tracing::debug!(event_id = %event.id, "webhook replay short-circuited");
            return Ok(WebhookOutcome::Replay);
        }

        match self.dispatch(&event).await {
            Ok(outcome @ (WebhookOutcome::Processed | WebhookOutcome::Ignored)) => {
                self.webhook_events
                    .insert(&WebhookEventRecord {
                        external_event_id: event.id.clone(),
                        event_type: event.event_type.clone(),
                        processed_at: Utc::now(),
                    })
                    .await?;
                Ok(outcome)
            }
            Ok(other) => Ok(other),
            Err(e) => {
                // Processing error: log, answer 200, let redelivery retry.
                tracing::warn!(event_id = %event.id, error = %e, "webhook processing failed");
                Ok(WebhookOutcome::Failed)
            }
        }
    }

    async fn dispatch(&self, event: &ProviderEvent) -> Result<WebhookOutcome, AppError> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                // The authoritative amounts arrive on the intent event.
                tracing::info!(session_id = %event.data.object.id, "checkout session completed");
                Ok(WebhookOutcome::Processed)
            }
            "payment_intent.succeeded" => {
                let session_id = event.data.object.session_reference().ok_or_else(|| {
                    AppError::Validation("intent event missing session reference".to_string())
                })?;
                self.apply_succeeded(&session_id, event).await
            }
            "payment_intent.payment_failed" => {
                let session_id = event.data.object.session_reference().ok_or_else(|| {
                    AppError::Validation("intent event missing session reference".to_string())
                })?;
                self.apply_failed(&session_id, event).await
            }
            "account.updated" => {
                tracing::info!(
                    account_id = %event.data.object.id,
                    capabilities = ?event.data.object.capabilities,
                    "connected account updated"
                );
                Ok(WebhookOutcome::Processed)
            }
            other => {
                tracing::debug!(event_type = %other, "ignoring unknown webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn apply_succeeded(
        &self,
        session_id: &str,
        event: &ProviderEvent,
    ) -> Result<WebhookOutcome, AppError> {
        let lock = self.lock_session(session_id).await;
        let _guard = lock.lock().await;

        let mut payment = self
            .payments
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment for session {session_id}")))?;

        // The intent event is authoritative for amount and currency; the fee
        // follows the reconciled amount.
        let authoritative_fee = event.data.object.amount.map(|a| self.fee_percent.fee_for(a));
        let changed = payment.mark_completed(
            &event.data.object.id,
            event.data.object.amount,
            event.data.object.currency.clone(),
            authoritative_fee,
        )?;

        if changed {
            self.payments.update(&payment).await?;
            self.audit
                .append(
                    payment.user_did.as_str(),
                    "payment.transition.succeeded",
                    AuditOutcome::Success,
                    None,
                    Some(session_id.to_string()),
                )
                .await?;
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn apply_failed(
        &self,
        session_id: &str,
        event: &ProviderEvent,
    ) -> Result<WebhookOutcome, AppError> {
        let lock = self.lock_session(session_id).await;
        let _guard = lock.lock().await;

        let mut payment = self
            .payments
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment for session {session_id}")))?;

        let reason = event
            .data
            .object
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "payment failed".to_string());

        let changed = payment.mark_failed(&reason)?;
        if changed {
            self.payments.update(&payment).await?;
            self.audit
                .append(
                    payment.user_did.as_str(),
                    "payment.transition.failed",
                    AuditOutcome::Success,
                    None,
                    Some(session_id.to_string()),
                )
                .await?;
        }
        Ok(WebhookOutcome::Processed)
    }

    /// Retention job for the idempotency key store.
    pub async fn cleanup_expired_idempotency_keys(&self) -> Result<u64, AppError> {
        let cutoff = Utc::now() - Duration::hours(IDEMPOTENCY_RETENTION_HOURS);
        self.idempotency_keys.delete_older_than(cutoff).await
    }
}
