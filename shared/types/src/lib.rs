use serde::{Deserialize, Serialize};

pub mod did;
pub mod geo;

// Re-exports principales
pub use did::Did;
pub use geo::{GeoPoint, Geohash, ANALYTICS_GEOHASH_PRECISION, PUBLIC_GEOHASH_PRECISION};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

/// Correlation id attached to every HTTP request and echoed in responses
/// and log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
