use sha2::{Digest, Sha256};
use std::f64::consts::PI;
use uuid::Uuid;

use subcults_types::{GeoPoint, Geohash};

/// Maximum display offset in meters.
const JITTER_RADIUS_M: f64 = 250.0;
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Map-display coordinates for an entity whose public location is a coarse
/// geohash. The cell center is offset by a per-entity deterministic jitter so
/// markers neither stack on the cell center nor flicker between sessions.
///
/// The entity id seeds polar coordinates; `r = sqrt(u) * R` keeps the offset
/// uniform over the disk area rather than clustered at the center.
pub fn jittered_display_point(entity_id: Uuid, coarse: &Geohash) -> GeoPoint {
    let center = coarse.center();

    let digest = Sha256::digest(entity_id.as_bytes());
    let u = u64::from_be_bytes(digest[0..8].try_into().unwrap()) as f64 / u64::MAX as f64;
    let theta_unit = u64::from_be_bytes(digest[8..16].try_into().unwrap()) as f64 / u64::MAX as f64;

    let r = u.sqrt() * JITTER_RADIUS_M;
    let theta = theta_unit * 2.0 * PI;

    let d_north = r * theta.cos();
    let d_east = r * theta.sin();

    let lat = center.lat + d_north / METERS_PER_DEGREE_LAT;
    let meters_per_degree_lng = METERS_PER_DEGREE_LAT * center.lat.to_radians().cos().max(0.01);
    let lng = center.lng + d_east / meters_per_degree_lng;

    GeoPoint {
        lat: lat.clamp(-90.0, 90.0),
        lng: ((lng + 180.0).rem_euclid(360.0)) - 180.0,
    }
}
