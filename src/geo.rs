use std::fmt;

/// A longitude/latitude pair.
///
/// Upstream APIs disagree on axis order (`[lon, lat]` in GeoJSON, `lat,lon` in
/// weather queries), so both axes are always named at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    longitude: f64,
    latitude: f64,
}

impl Coordinate {
    /// Returns `None` unless both values are finite.
    pub fn new(longitude: f64, latitude: f64) -> Option<Self> {
        if longitude.is_finite() && latitude.is_finite() {
            Some(Self {
                longitude,
                latitude,
            })
        } else {
            None
        }
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Midpoint of a box given by its corner coordinates.
    pub fn midpoint(west: f64, south: f64, east: f64, north: f64) -> Option<Self> {
        Self::new((west + east) / 2.0, (south + north) / 2.0)
    }

    /// `lat,lon` form used by the weather lookup query.
    pub fn to_query(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Coordinate(longitude={}, latitude={})",
            self.longitude, self.latitude
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_finite_axes() {
        assert!(Coordinate::new(f64::NAN, 1.0).is_none());
        assert!(Coordinate::new(1.0, f64::INFINITY).is_none());
        assert!(Coordinate::new(-180.0, 90.0).is_some());
    }

    #[test]
    fn midpoint_averages_each_axis() {
        let mid = Coordinate::midpoint(10.0, 40.0, 15.0, 50.0).unwrap();
        assert_eq!(mid, Coordinate::new(12.5, 45.0).unwrap());
    }

    #[test]
    fn query_is_latitude_first() {
        let coord = Coordinate::new(12.5, 45.0).unwrap();
        assert_eq!(coord.to_query(), "45,12.5");
    }
}
