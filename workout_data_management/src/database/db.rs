use std::{path::Path, time::Duration};

use const_format::concatcp;
use sqlx::{query, query_as, sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Executor, Pool, Sqlite, SqlitePool};
use workout_tracker_lib::{location_fix::{decode_route, encode_route, LocationFix}, workout_record::WorkoutRecord};

use crate::{DataManagerError, StoredWorkout};

use super::constants::*;

const WORKOUT_COLUMNS: &str = concatcp!(
    WORKOUT_ID, ", ", USER_ID, ", ", ACTIVITY_KIND, ", ", DURATION_SECONDS, ", ",
    DISTANCE_KM, ", ", AVERAGE_SPEED_KMH, ", ", MAX_SPEED_KMH, ", ",
    CALORIES_ESTIMATE, ", ", CREATED_AT, ", ", NOTE
);

#[derive(Clone)]
pub struct WorkoutDatabase {
    pool: Pool<Sqlite>,
}

impl WorkoutDatabase {
    pub async fn connect(path: &Path) -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await
            .map_err(|err| DataManagerError::Database(format!("Failed to connect to database {:?}: {}", path, err)))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    /// A private database that lives as long as the pool. Used by tests.
    pub async fn connect_in_memory() -> Result<Self, DataManagerError> {
        // Every sqlite memory connection is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:").await
            .map_err(|err| DataManagerError::Database(format!("Failed to open in-memory database: {}", err)))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    pub async fn init(&self) -> Result<(), DataManagerError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", WORKOUTS_TABLE_NAME, "(",
                WORKOUT_ID,        " INTEGER PRIMARY KEY AUTOINCREMENT,",
                USER_ID,           " INTEGER NOT NULL,",
                ACTIVITY_KIND,     " TEXT NOT NULL,",
                DURATION_SECONDS,  " INTEGER NOT NULL,",
                DISTANCE_KM,       " REAL NOT NULL,",
                AVERAGE_SPEED_KMH, " REAL NOT NULL,",
                MAX_SPEED_KMH,     " REAL NOT NULL,",
                CALORIES_ESTIMATE, " REAL NOT NULL,",
                CREATED_AT,        " TIMESTAMP NOT NULL,",
                NOTE,              " TEXT,",
                ROUTE,             " BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_workouts_user ON ", WORKOUTS_TABLE_NAME, "(", USER_ID, ");
            ")).await
            .map_err(|err| DataManagerError::Database(format!("Failed to create tables: {}", err)))
            .map(|_| ())
    }

    pub async fn insert_workout(&self, record: &WorkoutRecord, route: &[LocationFix]) -> Result<i64, DataManagerError> {
        let route_blob = encode_route(route)
            .map_err(|err| DataManagerError::Encoding(format!("Failed to encode route: {}", err)))?;

        query_as::<_, (i64,)>(concatcp!("
            INSERT INTO ", WORKOUTS_TABLE_NAME, "(",
            WORKOUT_ID, ", ", USER_ID, ", ", ACTIVITY_KIND, ", ", DURATION_SECONDS, ", ", DISTANCE_KM, ", ",
            AVERAGE_SPEED_KMH, ", ", MAX_SPEED_KMH, ", ", CALORIES_ESTIMATE, ", ", CREATED_AT, ", ", NOTE, ", ", ROUTE, ")
            VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) RETURNING ", WORKOUT_ID))
                .bind(record.user_id)
                .bind(record.activity_kind.as_str())
                .bind(record.duration_seconds)
                .bind(record.distance_km)
                .bind(record.average_speed_kmh)
                .bind(record.max_speed_kmh)
                .bind(record.calories_estimate)
                .bind(record.created_at)
                .bind(&record.note)
                .bind(route_blob)
                .fetch_one(&self.pool).await
                .map_err(|err| DataManagerError::Database(format!("Failed to insert workout: {}", err)))
                .map(|row| row.0)
    }

    pub async fn get_workout(&self, workout_id: i64) -> Result<StoredWorkout, DataManagerError> {
        query_as::<_, StoredWorkout>(concatcp!("SELECT ", WORKOUT_COLUMNS, " FROM ", WORKOUTS_TABLE_NAME, " WHERE ", WORKOUT_ID, " = ?1"))
            .bind(workout_id)
            .fetch_optional(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to get workout: {}", err)))?
            .ok_or(DataManagerError::NotFound(workout_id))
    }

    /// Newest first.
    pub async fn get_user_workouts(&self, user_id: i64) -> Result<Vec<StoredWorkout>, DataManagerError> {
        query_as::<_, StoredWorkout>(concatcp!(
            "SELECT ", WORKOUT_COLUMNS, " FROM ", WORKOUTS_TABLE_NAME,
            " WHERE ", USER_ID, " = ?1 ORDER BY ", CREATED_AT, " DESC, ", WORKOUT_ID, " DESC"))
            .bind(user_id)
            .fetch_all(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to get workouts for user {}: {}", user_id, err)))
    }

    pub async fn get_route(&self, workout_id: i64) -> Result<Vec<LocationFix>, DataManagerError> {
        let (blob,) = query_as::<_, (Vec<u8>,)>(concatcp!("SELECT ", ROUTE, " FROM ", WORKOUTS_TABLE_NAME, " WHERE ", WORKOUT_ID, " = ?1"))
            .bind(workout_id)
            .fetch_optional(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to get route: {}", err)))?
            .ok_or(DataManagerError::NotFound(workout_id))?;

        decode_route(&blob).map_err(|err| DataManagerError::Encoding(format!("Failed to decode route of workout {}: {}", workout_id, err)))
    }

    pub async fn delete_workout(&self, workout_id: i64) -> Result<(), DataManagerError> {
        let result = query(concatcp!("DELETE FROM ", WORKOUTS_TABLE_NAME, " WHERE ", WORKOUT_ID, " = ?1"))
            .bind(workout_id)
            .execute(&self.pool).await
            .map_err(|err| DataManagerError::Database(format!("Failed to delete workout: {}", err)))?;

        if result.rows_affected() == 0 {
            return Err(DataManagerError::NotFound(workout_id));
        }
        Ok(())
    }
}
