use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shared::domain::errors::AppError;

pub const MAX_REASON_LEN: usize = 256;

/// Alliance edge weight, validated into [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllianceWeight(f64);

impl AllianceWeight {
    pub fn new(value: f64) -> Result<Self, AppError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(AppError::InvalidWeight);
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Optional free-text justification on an alliance edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllianceReason(String);

impl AllianceReason {
    pub fn new(value: impl Into<String>) -> Result<Self, AppError> {
        let value = value.into();
        if value.len() > MAX_REASON_LEN {
            return Err(AppError::Validation(format!(
                "reason must be at most {MAX_REASON_LEN} characters"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllianceStatus {
    Active,
    Suspended,
}

impl AllianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllianceStatus::Active => "active",
            AllianceStatus::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "active" => Ok(AllianceStatus::Active),
            "suspended" => Ok(AllianceStatus::Suspended),
            other => Err(AppError::Validation(format!(
                "unknown alliance status: {other}"
            ))),
        }
    }
}

impl fmt::Display for AllianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Owner,
    Curator,
    Member,
    Guest,
}

impl MembershipRole {
    /// Fixed role multiplier applied to the member's trust weight.
    pub fn multiplier(&self) -> f64 {
        match self {
            MembershipRole::Owner => 1.0,
            MembershipRole::Curator => 0.8,
            MembershipRole::Member => 0.5,
            MembershipRole::Guest => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Curator => "curator",
            MembershipRole::Member => "member",
            MembershipRole::Guest => "guest",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "owner" => Ok(MembershipRole::Owner),
            "curator" => Ok(MembershipRole::Curator),
            "member" => Ok(MembershipRole::Member),
            "guest" => Ok(MembershipRole::Guest),
            other => Err(AppError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Per-membership trust weight in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustWeight(f64);

impl TrustWeight {
    pub fn new(value: f64) -> Result<Self, AppError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(AppError::Validation(
                "trust weight must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "public" => Ok(Visibility::Public),
            "unlisted" => Ok(Visibility::Unlisted),
            "private" => Ok(Visibility::Private),
            other => Err(AppError::Validation(format!(
                "unknown visibility: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_accepts_interval_endpoints() {
        assert_eq!(AllianceWeight::new(0.0).unwrap().value(), 0.0);
        assert_eq!(AllianceWeight::new(1.0).unwrap().value(), 1.0);
    }

    #[test]
    fn weight_rejects_outside_interval() {
        assert!(matches!(
            AllianceWeight::new(-0.01),
            Err(AppError::InvalidWeight)
        ));
        assert!(matches!(
            AllianceWeight::new(1.01),
            Err(AppError::InvalidWeight)
        ));
        assert!(matches!(
            AllianceWeight::new(f64::NAN),
            Err(AppError::InvalidWeight)
        ));
    }

    #[test]
    fn reason_boundary_at_256() {
        assert!(AllianceReason::new("r".repeat(256)).is_ok());
        assert!(matches!(
            AllianceReason::new("r".repeat(257)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn role_multipliers() {
        assert_eq!(MembershipRole::Owner.multiplier(), 1.0);
        assert_eq!(MembershipRole::Curator.multiplier(), 0.8);
        assert_eq!(MembershipRole::Member.multiplier(), 0.5);
        assert_eq!(MembershipRole::Guest.multiplier(), 0.3);
    }

    #[test]
    fn status_rejects_unknown_on_ingest() {
        assert!(AllianceStatus::parse("active").is_ok());
        assert!(AllianceStatus::parse("dormant").is_err());
    }
}
