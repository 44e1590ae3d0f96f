use sqlx::FromRow;

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components are finite and inside their ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Most recent known fix of a vessel.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselPosition {
    pub vessel_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at_unix_seconds: i64,
}

impl VesselPosition {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Row shape of the latest-position query.
#[derive(Debug, FromRow)]
pub struct PositionRow {
    pub latitude: f64,
    pub longitude: f64,
    pub unix_time: i64,
}

impl PositionRow {
    pub fn into_position(self, vessel_id: &str) -> VesselPosition {
        VesselPosition {
            vessel_id: vessel_id.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            observed_at_unix_seconds: self.unix_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_ranges() {
        assert!(Coordinate::new(55.6902, 12.7099).is_valid());
        assert!(Coordinate::new(-90.0, 180.0).is_valid());
        assert!(!Coordinate::new(90.5, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.1).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }
}
