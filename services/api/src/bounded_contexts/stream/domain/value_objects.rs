use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shared::domain::errors::AppError;
use subcults_types::Did;

const PARTICIPANT_ID_MAX_LEN: usize = 48;

/// Deterministic logical participant identity: `"user-"` plus the last colon
/// segment of the DID, truncated to 48 chars. Transport-level reconnects from
/// the same DID map to the same participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn derive(did: &Did) -> Self {
        let raw = format!("user-{}", did.last_segment());
        Self(raw.chars().take(PARTICIPANT_ID_MAX_LEN).collect())
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, AppError> {
        let value = value.into();
        if value.is_empty() || value.len() > PARTICIPANT_ID_MAX_LEN {
            return Err(AppError::Validation(
                "participant id must be 1-48 characters".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantEventType {
    Join,
    Leave,
}

impl ParticipantEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantEventType::Join => "join",
            ParticipantEventType::Leave => "leave",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "join" => Ok(ParticipantEventType::Join),
            "leave" => Ok(ParticipantEventType::Leave),
            other => Err(AppError::Validation(format!(
                "unknown participant event type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_from_last_did_segment() {
        let did = Did::new("did:plc:abc").unwrap();
        assert_eq!(ParticipantId::derive(&did).as_str(), "user-abc");
    }

    #[test]
    fn derivation_is_deterministic() {
        let did = Did::new("did:plc:xyz987").unwrap();
        assert_eq!(ParticipantId::derive(&did), ParticipantId::derive(&did));
    }

    #[test]
    fn truncates_to_48_chars() {
        let long = format!("did:plc:{}", "a".repeat(100));
        let did = Did::new(long).unwrap();
        let id = ParticipantId::derive(&did);
        assert_eq!(id.as_str().len(), 48);
        assert!(id.as_str().starts_with("user-"));
    }
}
