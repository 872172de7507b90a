//! Proximity - great-circle distances and radius checks
//!
//! One Earth radius is used everywhere so distances are reproducible
//! across components and tests.

use geomesh_core::Coordinate;

/// Mean Earth radius in metres
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in metres
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Whether `point` lies within `radius_meters` of `center` (inclusive)
#[inline]
pub fn within_radius(point: Coordinate, center: Coordinate, radius_meters: f64) -> bool {
    distance_meters(point, center) <= radius_meters
}

/// Midpoint of a short segment.
///
/// Plain coordinate averaging; route segments are a few hundred metres to
/// a few kilometres long, where the error against the geodesic midpoint is
/// negligible.
#[inline]
pub fn midpoint(a: Coordinate, b: Coordinate) -> Coordinate {
    Coordinate::new(
        (a.latitude + b.latitude) / 2.0,
        (a.longitude + b.longitude) / 2.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = Coordinate::new(51.5, -0.1);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_known_distance() {
        // London to Paris, roughly 343.5 km
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let d = distance_meters(london, paris);
        assert!((d - 343_560.0).abs() < 1_000.0, "got {}", d);
    }

    #[test]
    fn test_meridian_degree() {
        // One degree of latitude is R * pi / 180
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        let expected = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn test_symmetry() {
        let a = Coordinate::new(40.7128, -74.0060);
        let b = Coordinate::new(34.0522, -118.2437);
        assert!((distance_meters(a, b) - distance_meters(b, a)).abs() < 1e-6);
    }

    #[test]
    fn test_within_radius_inclusive() {
        let center = Coordinate::new(0.0, 0.0);
        let point = Coordinate::new(0.001, 0.0);
        let d = distance_meters(point, center);

        assert!(within_radius(point, center, d));
        assert!(!within_radius(point, center, d - 0.01));
    }

    #[test]
    fn test_midpoint() {
        let m = midpoint(Coordinate::new(51.0, -1.0), Coordinate::new(52.0, 0.0));
        assert_eq!(m, Coordinate::new(51.5, -0.5));
    }
}
