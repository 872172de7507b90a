//! Position samples

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// A bare latitude/longitude pair in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinate {
            latitude,
            longitude,
        }
    }

    /// Both components are finite and within the valid degree ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A point-in-time position sample.
///
/// Immutable once attached to a report: the signature of a signed report
/// covers `latitude`, `longitude` and `timestamp`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64, timestamp: Timestamp) -> Self {
        GeoLocation {
            latitude,
            longitude,
            timestamp,
            accuracy: None,
            altitude: None,
            heading: None,
            speed: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    #[inline]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Same sample moved to another coordinate (used after obfuscation)
    pub fn with_coordinate(&self, coordinate: Coordinate) -> Self {
        GeoLocation {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            ..self.clone()
        }
    }
}

impl From<&GeoLocation> for Coordinate {
    fn from(location: &GeoLocation) -> Self {
        location.coordinate()
    }
}
