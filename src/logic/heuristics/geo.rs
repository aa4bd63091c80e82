//! Great-circle distance and travel speed

use serde::{Deserialize, Serialize};

/// Mean Earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Haversine distance in kilometres
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // Rounding can push h a hair past 1.0 for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Speed in km/h; the interval is floored at one second
pub fn implied_speed_kmh(distance_km: f64, elapsed_secs: i64) -> f64 {
    let secs = elapsed_secs.max(1) as f64;
    distance_km / (secs / 3600.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARIS: GeoPoint = GeoPoint { lat: 48.8566, lon: 2.3522 };
    const NEW_YORK: GeoPoint = GeoPoint { lat: 40.7128, lon: -74.0060 };

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(haversine_km(PARIS, PARIS), 0.0);
        assert_eq!(haversine_km(NEW_YORK, NEW_YORK), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let ab = haversine_km(PARIS, NEW_YORK);
        let ba = haversine_km(NEW_YORK, PARIS);
        assert!((ab - ba).abs() < 1e-9);
        // Roughly 5837 km
        assert!((ab - 5837.0).abs() < 20.0);
    }

    #[test]
    fn test_zero_elapsed_is_floored() {
        let speed = implied_speed_kmh(10.0, 0);
        assert!(speed.is_finite());
        assert!((speed - 36_000.0).abs() < 1e-6);

        assert!(implied_speed_kmh(10.0, -5).is_finite());
    }

    #[test]
    fn test_speed_per_hour() {
        assert!((implied_speed_kmh(900.0, 3600) - 900.0).abs() < 1e-9);
    }
}
