use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bounded_contexts::payment::domain::entities::PaymentRecord;

#[derive(Debug, Deserialize)]
pub struct OnboardRequest {
    pub scene_id: Uuid,
    pub refresh_url: String,
    pub return_url: String,
}

#[derive(Debug, Serialize)]
pub struct OnboardResponse {
    pub scene_id: Uuid,
    pub connected_account_id: String,
    pub onboarding_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub scene_id: Uuid,
    pub event_id: Option<Uuid>,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: String,
    pub items: Vec<CheckoutItem>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutItem {
    pub name: String,
    /// Unit price in minor units.
    pub amount: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
    pub status: String,
    pub amount: i64,
    /// Placeholder until reconciled by the payment_intent event.
    pub fee: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub status: String,
    pub amount: i64,
    pub fee: i64,
    pub currency: String,
    pub failure_reason: Option<String>,
}

impl From<&PaymentRecord> for StatusResponse {
    fn from(payment: &PaymentRecord) -> Self {
        Self {
            session_id: payment.session_id.clone(),
            status: payment.status.to_string(),
            amount: payment.amount_minor,
            fee: payment.fee_minor,
            currency: payment.currency.clone(),
            failure_reason: payment.failure_reason.clone(),
        }
    }
}
