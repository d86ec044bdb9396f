use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DidError {
    #[error("DID must start with 'did:'")]
    MissingScheme,
    #[error("DID is missing a method or identifier segment")]
    MissingSegment,
}

/// Decentralized identifier string, e.g. `did:plc:ab12cd34`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    pub fn new(value: impl Into<String>) -> Result<Self, DidError> {
        let value = value.into();
        if !value.starts_with("did:") {
            return Err(DidError::MissingScheme);
        }
        // did:<method>:<identifier>, identifier must be non-empty
        let mut parts = value.splitn(3, ':');
        let _scheme = parts.next();
        let method = parts.next().unwrap_or_default();
        let identifier = parts.next().unwrap_or_default();
        if method.is_empty() || identifier.is_empty() {
            return Err(DidError::MissingSegment);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last colon-delimited segment, used to derive stable participant ids.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plc_did() {
        let did = Did::new("did:plc:abc123").unwrap();
        assert_eq!(did.as_str(), "did:plc:abc123");
        assert_eq!(did.last_segment(), "abc123");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_eq!(Did::new("plc:abc").unwrap_err(), DidError::MissingScheme);
    }

    #[test]
    fn rejects_missing_identifier() {
        assert_eq!(Did::new("did:plc").unwrap_err(), DidError::MissingSegment);
        assert_eq!(Did::new("did:plc:").unwrap_err(), DidError::MissingSegment);
    }

    #[test]
    fn last_segment_of_web_did() {
        let did = Did::new("did:web:example.com:user:alice").unwrap();
        assert_eq!(did.last_segment(), "alice");
    }
}
