use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityKind;

/// The summary of a finished session, handed to the workout store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub user_id: i64,
    pub activity_kind: ActivityKind,
    /// Active time only, paused time is excluded.
    pub duration_seconds: i64,
    pub distance_km: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub calories_estimate: f64,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl WorkoutRecord {
    /// A record with no distance, e.g. a session that never got a fix.
    /// Callers may choose not to keep these.
    pub fn is_degenerate(&self) -> bool {
        self.distance_km <= 0.0
    }
}
