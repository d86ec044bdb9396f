use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;

/// What the payment context needs from the provider; swapped for a mock at
/// test wiring time.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, AppError>;

    /// Create (or reuse) a connected account for the scene and return an
    /// onboarding link for its owner.
    async fn create_connect_onboarding(
        &self,
        scene_id: Uuid,
        existing_account_id: Option<&str>,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<ConnectOnboarding, AppError>;
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub connected_account_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub line_items: Vec<CheckoutLineItem>,
    pub application_fee_minor: i64,
    pub currency: String,
    /// Round-trips through the provider into webhook events.
    pub client_reference_id: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutLineItem {
    pub name: String,
    pub amount_minor: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ConnectOnboarding {
    pub account_id: String,
    pub url: String,
}

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Stripe implementation over the form-encoded HTTP API.
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeAccountResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeAccountLinkResponse {
    url: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            secret_key,
            base_url: STRIPE_API_BASE.to_string(),
        })
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, AppError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("stripe request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "stripe API error");
            return Err(AppError::ExternalService(format!(
                "stripe returned {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::ExternalService(format!("stripe response invalid: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, AppError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), request.success_url),
            ("cancel_url".into(), request.cancel_url),
            ("client_reference_id".into(), request.client_reference_id),
            (
                "payment_intent_data[application_fee_amount]".into(),
                request.application_fee_minor.to_string(),
            ),
            (
                "payment_intent_data[transfer_data][destination]".into(),
                request.connected_account_id,
            ),
        ];
        for (i, item) in request.line_items.iter().enumerate() {
            form.push((
                format!("line_items[{i}][price_data][currency]"),
                request.currency.clone(),
            ));
            form.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            form.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.amount_minor.to_string(),
            ));
            form.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        let session: StripeCheckoutSessionResponse =
            self.post_form("/checkout/sessions", &form).await?;
        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }

    async fn create_connect_onboarding(
        &self,
        scene_id: Uuid,
        existing_account_id: Option<&str>,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<ConnectOnboarding, AppError> {
        let account_id = match existing_account_id {
            Some(id) => id.to_string(),
            None => {
                let form = vec![
                    ("type".to_string(), "express".to_string()),
                    ("metadata[scene_id]".to_string(), scene_id.to_string()),
                ];
                let account: StripeAccountResponse = self.post_form("/accounts", &form).await?;
                account.id
            }
        };

        let form = vec![
            ("account".to_string(), account_id.clone()),
            ("refresh_url".to_string(), refresh_url.to_string()),
            ("return_url".to_string(), return_url.to_string()),
            ("type".to_string(), "account_onboarding".to_string()),
        ];
        let link: StripeAccountLinkResponse = self.post_form("/account_links", &form).await?;

        Ok(ConnectOnboarding {
            account_id,
            url: link.url,
        })
    }
}

/// Deterministic gateway for tests and local development.
pub struct MockPaymentGateway {
    counter: AtomicU64,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout_session(
        &self,
        _request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, AppError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutSession {
            session_id: format!("cs_test_{n}"),
            url: format!("https://checkout.example.test/session/{n}"),
        })
    }

    async fn create_connect_onboarding(
        &self,
        _scene_id: Uuid,
        existing_account_id: Option<&str>,
        _refresh_url: &str,
        _return_url: &str,
    ) -> Result<ConnectOnboarding, AppError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectOnboarding {
            account_id: existing_account_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("acct_test_{n}")),
            url: format!("https://connect.example.test/onboard/{n}"),
        })
    }
}
