use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{activity::ActivityKind, tracking_session::SessionState};

/// Minutes per kilometer, which has no value before any distance is covered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Pace {
    MinutesPerKm(f64),
    NotAvailable,
}

impl Pace {
    pub fn from_elapsed(elapsed_seconds: f64, distance_km: f64) -> Self {
        if distance_km > 0.0 {
            Pace::MinutesPerKm(elapsed_seconds / 60.0 / distance_km)
        } else {
            Pace::NotAvailable
        }
    }

    pub fn minutes_per_km(&self) -> Option<f64> {
        match self {
            Pace::MinutesPerKm(pace) => Some(*pace),
            Pace::NotAvailable => None,
        }
    }
}

impl fmt::Display for Pace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pace::MinutesPerKm(pace) => {
                let total_secs = (pace * 60.0).round() as i64;
                write!(f, "{}:{:02} /km", total_secs / 60, total_secs % 60)
            }
            Pace::NotAvailable => f.write_str("N/A"),
        }
    }
}

/// Read-only view of a session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub activity_kind: Option<ActivityKind>,
    pub elapsed_seconds: f64,
    pub distance_km: f64,
    pub current_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub average_speed_kmh: f64,
    pub pace: Pace,
    pub calories_estimate: f64,
    /// Altitude of the latest accepted fix, if it reported one.
    pub altitude_meters: Option<f64>,
    pub fix_count: usize,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            activity_kind: None,
            elapsed_seconds: 0.0,
            distance_km: 0.0,
            current_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
            average_speed_kmh: 0.0,
            pace: Pace::NotAvailable,
            calories_estimate: 0.0,
            altitude_meters: None,
            fix_count: 0,
        }
    }
}
