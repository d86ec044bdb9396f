use subcults_types::GeoPoint;

/// Entities carrying an optional precise point guarded by a consent flag.
pub trait LocationConsent {
    fn allow_precise(&self) -> bool;
    fn precise_point(&self) -> Option<GeoPoint>;
    fn clear_precise_point(&mut self);
}

/// Invariant: `allow_precise = false` implies no precise point. Called before
/// every persistence operation on scenes and events; the schema carries a
/// matching CHECK constraint.
pub fn enforce_location_consent<T: LocationConsent>(entity: &mut T) {
    if !entity.allow_precise() && entity.precise_point().is_some() {
        tracing::debug!("clearing precise point without consent");
        entity.clear_precise_point();
    }
}
