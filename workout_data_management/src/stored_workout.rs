use serde::{Deserialize, Serialize};
use sqlx::{prelude::*, sqlite::SqliteRow};
use workout_tracker_lib::{activity::ActivityKind, workout_record::WorkoutRecord};

use crate::database::constants::*;

/// A workout record as persisted, together with the id the store gave it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkout {
    pub workout_id: i64,
    #[serde(flatten)]
    pub record: WorkoutRecord,
}

impl FromRow<'_, SqliteRow> for StoredWorkout {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let activity_kind: String = row.try_get(ACTIVITY_KIND)?;
        let activity_kind = activity_kind.parse::<ActivityKind>()
            .map_err(|err| sqlx::Error::ColumnDecode { index: ACTIVITY_KIND.into(), source: Box::new(err) })?;

        Ok(Self {
            workout_id: row.try_get(WORKOUT_ID)?,
            record: WorkoutRecord {
                user_id: row.try_get(USER_ID)?,
                activity_kind,
                duration_seconds: row.try_get(DURATION_SECONDS)?,
                distance_km: row.try_get(DISTANCE_KM)?,
                average_speed_kmh: row.try_get(AVERAGE_SPEED_KMH)?,
                max_speed_kmh: row.try_get(MAX_SPEED_KMH)?,
                calories_estimate: row.try_get(CALORIES_ESTIMATE)?,
                created_at: row.try_get(CREATED_AT)?,
                note: row.try_get(NOTE)?,
            },
        })
    }
}
