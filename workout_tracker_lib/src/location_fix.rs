use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::geo::is_valid_coordinate;

/// A single location sample reported by the location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level. Display only, never used for distance.
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Instantaneous speed in meters per second.
    #[serde(default)]
    pub speed: Option<f64>,
    /// Horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed: None,
            accuracy: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Speed in m/s, with a missing, negative or non-finite reading counted as 0.
    pub fn speed_mps(&self) -> f64 {
        match self.speed {
            Some(speed) if speed.is_finite() && speed > 0.0 => speed,
            _ => 0.0,
        }
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn has_valid_position(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }

    /// The fix as a geo point, `x` being longitude.
    pub fn position(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}

/// Encodes a route for storage as a single blob.
pub fn encode_route(route: &[LocationFix]) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(route)
}

pub fn decode_route(bytes: &[u8]) -> Result<Vec<LocationFix>, bincode::Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bincode::deserialize(bytes)
}
