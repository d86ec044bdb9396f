pub mod consent;
pub mod exif;
pub mod jitter;
pub mod redact;

pub use consent::{enforce_location_consent, LocationConsent};
pub use exif::strip_image_metadata;
pub use jitter::jittered_display_point;
pub use redact::redact_pii;
