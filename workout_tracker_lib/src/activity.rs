use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of workout being tracked. Fixed when a session is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Running,
    Cycling,
    Walking,
    Swimming,
    Other,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::Running,
        ActivityKind::Cycling,
        ActivityKind::Walking,
        ActivityKind::Swimming,
        ActivityKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Running => "running",
            ActivityKind::Cycling => "cycling",
            ActivityKind::Walking => "walking",
            ActivityKind::Swimming => "swimming",
            ActivityKind::Other => "other",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown activity kind: {0}")]
pub struct UnknownActivityKind(pub String);

impl FromStr for ActivityKind {
    type Err = UnknownActivityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownActivityKind(s.to_string()))
    }
}

/// Calorie burn rates for a single activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityRates {
    /// Calories burned per hour of active time.
    pub base_per_hour: f64,
    /// Calories added per kilometer covered.
    pub per_km: f64,
}

impl ActivityRates {
    pub const fn new(base_per_hour: f64, per_km: f64) -> Self {
        Self { base_per_hour, per_km }
    }
}

/// The per-activity calorie table.
///
/// The estimate is `base_per_hour * elapsed_hours + per_km * distance_km`.
/// Rates are product configuration, so every entry can be overridden from a
/// config file; kinds left out keep their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorieRates {
    pub running: ActivityRates,
    pub cycling: ActivityRates,
    pub walking: ActivityRates,
    pub swimming: ActivityRates,
    pub other: ActivityRates,
}

impl Default for CalorieRates {
    fn default() -> Self {
        Self {
            running: ActivityRates::new(600.0, 60.0),
            cycling: ActivityRates::new(400.0, 30.0),
            walking: ActivityRates::new(300.0, 50.0),
            swimming: ActivityRates::new(500.0, 100.0),
            other: ActivityRates::new(350.0, 40.0),
        }
    }
}

impl CalorieRates {
    pub fn rates(&self, kind: ActivityKind) -> ActivityRates {
        match kind {
            ActivityKind::Running => self.running,
            ActivityKind::Cycling => self.cycling,
            ActivityKind::Walking => self.walking,
            ActivityKind::Swimming => self.swimming,
            ActivityKind::Other => self.other,
        }
    }

    /// Never negative, even with a misconfigured table.
    pub fn estimate(&self, kind: ActivityKind, elapsed_hours: f64, distance_km: f64) -> f64 {
        let rates = self.rates(kind);
        let base = rates.base_per_hour.max(0.0) * elapsed_hours.max(0.0);
        let bonus = rates.per_km.max(0.0) * distance_km.max(0.0);
        base + bonus
    }
}
