use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Precision served to unauthenticated readers, ~±0.6 km.
pub const PUBLIC_GEOHASH_PRECISION: usize = 6;
/// Precision retained for stream analytics, ~±20 km.
pub const ANALYTICS_GEOHASH_PRECISION: usize = 4;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("latitude out of range: {0}")]
    LatitudeOutOfRange(f64),
    #[error("longitude out of range: {0}")]
    LongitudeOutOfRange(f64),
    #[error("invalid geohash character: {0}")]
    InvalidGeohashChar(char),
    #[error("geohash cannot be empty")]
    EmptyGeohash,
}

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }
}

/// Z-order base32 hash of a lat/lng pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geohash(String);

impl Geohash {
    pub fn encode(point: GeoPoint, precision: usize) -> Self {
        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lng_range = (-180.0_f64, 180.0_f64);
        let mut hash = String::with_capacity(precision);
        let mut bits = 0u8;
        let mut bit_count = 0u8;
        let mut even_bit = true;

        while hash.len() < precision {
            if even_bit {
                let mid = (lng_range.0 + lng_range.1) / 2.0;
                if point.lng >= mid {
                    bits = (bits << 1) | 1;
                    lng_range.0 = mid;
                } else {
                    bits <<= 1;
                    lng_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if point.lat >= mid {
                    bits = (bits << 1) | 1;
                    lat_range.0 = mid;
                } else {
                    bits <<= 1;
                    lat_range.1 = mid;
                }
            }
            even_bit = !even_bit;
            bit_count += 1;
            if bit_count == 5 {
                hash.push(BASE32[bits as usize] as char);
                bits = 0;
                bit_count = 0;
            }
        }
        Self(hash)
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, GeoError> {
        let value = value.into();
        if value.is_empty() {
            return Err(GeoError::EmptyGeohash);
        }
        for c in value.chars() {
            if !BASE32.contains(&(c as u8)) {
                return Err(GeoError::InvalidGeohashChar(c));
            }
        }
        Ok(Self(value))
    }

    /// Center of the cell this hash names.
    pub fn center(&self) -> GeoPoint {
        let mut lat_range = (-90.0_f64, 90.0_f64);
        let mut lng_range = (-180.0_f64, 180.0_f64);
        let mut even_bit = true;

        for c in self.0.bytes() {
            let idx = BASE32.iter().position(|b| *b == c).unwrap_or(0) as u8;
            for shift in (0..5).rev() {
                let bit = (idx >> shift) & 1;
                if even_bit {
                    let mid = (lng_range.0 + lng_range.1) / 2.0;
                    if bit == 1 {
                        lng_range.0 = mid;
                    } else {
                        lng_range.1 = mid;
                    }
                } else {
                    let mid = (lat_range.0 + lat_range.1) / 2.0;
                    if bit == 1 {
                        lat_range.0 = mid;
                    } else {
                        lat_range.1 = mid;
                    }
                }
                even_bit = !even_bit;
            }
        }
        GeoPoint {
            lat: (lat_range.0 + lat_range.1) / 2.0,
            lng: (lng_range.0 + lng_range.1) / 2.0,
        }
    }

    pub fn truncated(&self, precision: usize) -> Geohash {
        Self(self.0.chars().take(precision).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
