use async_trait::async_trait;
use workout_tracker_lib::{location_fix::LocationFix, workout_record::WorkoutRecord};

use crate::DataManagerError;

/// Durable home for finished workouts.
///
/// A failed save is reported as is. Retrying is up to the caller, who still
/// holds the record.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    /// Persists the record and its route, returning the new workout id.
    async fn save_workout(&self, record: &WorkoutRecord, route: &[LocationFix]) -> Result<i64, DataManagerError>;
}
