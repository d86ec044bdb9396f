use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use subcults_types::Did;

use super::value_objects::PaymentStatus;

/// One payment, keyed by the provider's checkout session id and driven
/// through the strict lifecycle by signed webhook events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// External checkout session id.
    pub session_id: String,
    /// Gross amount in minor units. Create-time values are placeholders; the
    /// payment_intent event carries the authoritative amount.
    pub amount_minor: i64,
    pub fee_minor: i64,
    pub currency: String,
    pub user_did: Did,
    pub scene_id: Uuid,
    pub event_id: Option<Uuid>,
    pub connected_account_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    fn transition(&mut self, next: PaymentStatus) -> Result<bool, AppError> {
        if self.status == next {
            // Re-applying a transition already taken is a success no-op.
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Reconcile with the authoritative intent event. The intent id is pinned
    /// on first sight; a different id on a later event is rejected.
    pub fn mark_completed(
        &mut self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
        currency: Option<String>,
        fee_minor: Option<i64>,
    ) -> Result<bool, AppError> {
        match &self.payment_intent_id {
            Some(existing) if existing != payment_intent_id => {
                return Err(AppError::PaymentIntentMismatch);
            }
            _ => {}
        }
        let changed = self.transition(PaymentStatus::Succeeded)?;
        if changed {
            self.payment_intent_id = Some(payment_intent_id.to_string());
            if let Some(amount) = amount_minor {
                self.amount_minor = amount;
            }
            if let Some(currency) = currency {
                self.currency = currency;
            }
            if let Some(fee) = fee_minor {
                self.fee_minor = fee;
            }
        }
        Ok(changed)
    }

    pub fn mark_failed(&mut self, reason: &str) -> Result<bool, AppError> {
        let changed = self.transition(PaymentStatus::Failed)?;
        if changed {
            self.failure_reason = Some(reason.to_string());
        }
        Ok(changed)
    }

    pub fn mark_canceled(&mut self) -> Result<bool, AppError> {
        self.transition(PaymentStatus::Canceled)
    }

    pub fn mark_refunded(&mut self) -> Result<bool, AppError> {
        self.transition(PaymentStatus::Refunded)
    }
}

/// Processed provider event; its unique id makes webhook replay a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub external_event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

/// Cached response for a client idempotency key; 24 h retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub route: String,
    pub response_status: u16,
    pub response_body: String,
    pub response_hash: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PaymentRecord {
        PaymentRecord {
            session_id: "cs_test_123".into(),
            amount_minor: 2000,
            fee_minor: 100,
            currency: "eur".into(),
            user_did: Did::new("did:plc:payer").unwrap(),
            scene_id: Uuid::new_v4(),
            event_id: None,
            connected_account_id: Some("acct_1".into()),
            payment_intent_id: None,
            status: PaymentStatus::Pending,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn completes_and_reconciles_amount() {
        let mut payment = record();
        let changed = payment
            .mark_completed("pi_1", Some(2500), Some("usd".into()), Some(125))
            .unwrap();
        assert!(changed);
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.amount_minor, 2500);
        assert_eq!(payment.currency, "usd");
        assert_eq!(payment.fee_minor, 125);
        assert_eq!(payment.payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn completing_twice_is_a_no_op() {
        let mut payment = record();
        payment.mark_completed("pi_1", None, None, None).unwrap();
        let changed = payment.mark_completed("pi_1", Some(9999), None, None).unwrap();
        assert!(!changed);
        // Values from the replayed event are ignored.
        assert_eq!(payment.amount_minor, 2000);
    }

    #[test]
    fn intent_mismatch_is_rejected() {
        let mut payment = record();
        payment.mark_completed("pi_1", None, None, None).unwrap();
        let err = payment.mark_completed("pi_2", None, None, None).unwrap_err();
        assert!(matches!(err, AppError::PaymentIntentMismatch));
    }

    #[test]
    fn failed_after_succeeded_is_invalid() {
        let mut payment = record();
        payment.mark_completed("pi_1", None, None, None).unwrap();
        let err = payment.mark_failed("card declined").unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn refund_requires_success() {
        let mut payment = record();
        assert!(matches!(
            payment.mark_refunded(),
            Err(AppError::InvalidTransition { .. })
        ));
        payment.mark_completed("pi_1", None, None, None).unwrap();
        assert!(payment.mark_refunded().unwrap());
        // Re-applying the terminal transition succeeds without change.
        assert!(!payment.mark_refunded().unwrap());
    }

    #[test]
    fn failure_records_reason() {
        let mut payment = record();
        payment.mark_failed("insufficient funds").unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("insufficient funds"));
    }
}
