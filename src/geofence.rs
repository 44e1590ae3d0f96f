//! Great-circle distance and radius decisions.

use crate::models::alarm::AlarmMode;
use crate::models::position::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two coordinates on a spherical Earth.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push h a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_METERS * h.min(1.0).sqrt().asin()
}

pub fn is_within_radius(position: Coordinate, center: Coordinate, radius_meters: f64) -> bool {
    distance_meters(position, center) <= radius_meters
}

/// Whether an alarm of `mode` fires for a vessel at `position`.
pub fn evaluate(
    mode: AlarmMode,
    position: Coordinate,
    center: Coordinate,
    radius_meters: f64,
) -> bool {
    let inside = is_within_radius(position, center, radius_meters);
    match mode {
        AlarmMode::InsideRadius => inside,
        AlarmMode::OutsideRadius => !inside,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Coordinate> {
        vec![
            Coordinate::new(55.6902, 12.7099),
            Coordinate::new(55.757911, 12.453396),
            Coordinate::new(-33.8688, 151.2093),
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 180.0),
            Coordinate::new(89.9, -179.9),
            Coordinate::new(-90.0, 45.0),
        ]
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        for a in points() {
            assert!(distance_meters(a, a).abs() < 1e-6);
            for b in points() {
                assert!((distance_meters(a, b) - distance_meters(b, a)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        let expected = 111_195.0;
        assert!((d - expected).abs() / expected < 0.01, "got {d}");
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[test]
    fn test_radius_boundary_is_inside() {
        let center = Coordinate::new(55.6902, 12.7099);
        let pos = Coordinate::new(55.719389, 12.7099);
        let d = distance_meters(pos, center);
        assert!(is_within_radius(pos, center, d));
        assert!(!is_within_radius(pos, center, d - 1.0));
    }

    #[test]
    fn test_modes_are_negations() {
        let center = Coordinate::new(55.6902, 12.7099);
        for pos in points() {
            for radius in [1.0, 3_245.67, 5_000.0, 1_000_000.0, 25_000_000.0] {
                assert_eq!(
                    evaluate(AlarmMode::InsideRadius, pos, center, radius),
                    !evaluate(AlarmMode::OutsideRadius, pos, center, radius)
                );
            }
        }
    }

    #[test]
    fn test_outside_mode_at_center_does_not_fire() {
        let center = Coordinate::new(55.6902, 12.7099);
        assert!(!evaluate(AlarmMode::OutsideRadius, center, center, 5_000.0));
        assert!(evaluate(AlarmMode::InsideRadius, center, center, 5_000.0));
    }
}
