use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::config::Environment;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;
pub const MAX_LINE_ITEM_QUANTITY: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" => Ok(PaymentStatus::Canceled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(AppError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }

    /// The only legal transitions:
    /// pending -> succeeded | failed | canceled, succeeded -> refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Succeeded)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Pending, PaymentStatus::Canceled)
                | (PaymentStatus::Succeeded, PaymentStatus::Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-supplied key gating at-most-once effect of checkout creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(value: impl Into<String>) -> Result<Self, AppError> {
        let value = value.into();
        if value.is_empty() {
            return Err(AppError::MissingIdempotencyKey);
        }
        if value.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::IdempotencyKeyTooLong);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Platform fee in percent of the gross amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePercent(f64);

impl FeePercent {
    pub fn new(value: f64) -> Result<Self, AppError> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(AppError::Validation(
                "fee percent must be between 0 and 100".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Fee on an amount in minor units, rounded down.
    pub fn fee_for(&self, amount_minor: i64) -> i64 {
        ((amount_minor as f64) * self.0 / 100.0).floor() as i64
    }
}

/// Redirect targets must be HTTPS; plain-http localhost is tolerated in dev.
pub fn validate_redirect_url(url: &str, environment: &Environment) -> Result<(), AppError> {
    if url.starts_with("https://") {
        return Ok(());
    }
    let is_localhost = url.starts_with("http://localhost") || url.starts_with("http://127.0.0.1");
    if is_localhost && environment.is_development() {
        return Ok(());
    }
    Err(AppError::Validation(format!("invalid redirect url: {url}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_strict() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Succeeded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Canceled));
        assert!(Succeeded.can_transition_to(Refunded));

        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Refunded.can_transition_to(Pending));
        assert!(!Canceled.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn idempotency_key_boundary() {
        assert!(IdempotencyKey::new("k".repeat(64)).is_ok());
        assert!(matches!(
            IdempotencyKey::new("k".repeat(65)),
            Err(AppError::IdempotencyKeyTooLong)
        ));
        assert!(matches!(
            IdempotencyKey::new(""),
            Err(AppError::MissingIdempotencyKey)
        ));
    }

    #[test]
    fn fee_is_floor_of_percentage() {
        let fee = FeePercent::new(5.0).unwrap();
        assert_eq!(fee.fee_for(1000), 50);
        assert_eq!(fee.fee_for(999), 49);
        assert_eq!(fee.fee_for(0), 0);
    }

    #[test]
    fn url_validation_depends_on_environment() {
        assert!(validate_redirect_url("https://subcults.net/done", &Environment::Production).is_ok());
        assert!(validate_redirect_url("http://localhost:3000/done", &Environment::Development).is_ok());
        assert!(validate_redirect_url("http://localhost:3000/done", &Environment::Production).is_err());
        assert!(validate_redirect_url("http://subcults.net/done", &Environment::Development).is_err());
    }
}
