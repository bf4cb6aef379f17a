use std::path::{Path, PathBuf};

use async_trait::async_trait;
use workout_tracker_lib::{location_fix::LocationFix, workout_record::WorkoutRecord};

use crate::{database::db::WorkoutDatabase, gpx_util, DataManagerError, StoredWorkout, WorkoutStore, DATABASE_PATH, DATA_DIR, GPX_DIR};

#[derive(Clone)]
pub struct DataManager {
    pub(crate) database: WorkoutDatabase,
    root: PathBuf,
}

/// The public interface for all workout data management.
impl DataManager {
    /// Opens the data directory under the project root.
    pub async fn start() -> Result<Self, DataManagerError> {
        let root = project_root::get_project_root()
            .map_err(|err| DataManagerError::Io(format!("Failed to find project root: {}", err)))?;
        Self::start_at(root).await
    }

    /// Opens (creating if needed) the data directory under `root`.
    pub async fn start_at(root: impl Into<PathBuf>) -> Result<Self, DataManagerError> {
        let root = root.into();
        let data_dir = root.join(DATA_DIR);
        if !data_dir.exists() {
            tokio::fs::create_dir_all(&data_dir).await
                .map_err(|_| DataManagerError::Io(format!("Failed to create data directory: {:?}", data_dir)))?;
        }

        let database = WorkoutDatabase::connect(&root.join(DATABASE_PATH)).await?;
        tracing::info!("Data manager started in {:?}", data_dir);

        Ok(DataManager {
            database,
            root,
        })
    }

    /// Database in memory, files under `root`.
    pub async fn in_memory(root: impl Into<PathBuf>) -> Result<Self, DataManagerError> {
        Ok(DataManager {
            database: WorkoutDatabase::connect_in_memory().await?,
            root: root.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn get_workout(&self, workout_id: i64) -> Result<StoredWorkout, DataManagerError> {
        self.database.get_workout(workout_id).await
    }

    pub async fn get_user_workouts(&self, user_id: i64) -> Result<Vec<StoredWorkout>, DataManagerError> {
        self.database.get_user_workouts(user_id).await
    }

    pub async fn get_route(&self, workout_id: i64) -> Result<Vec<LocationFix>, DataManagerError> {
        self.database.get_route(workout_id).await
    }

    pub async fn delete_workout(&self, workout_id: i64) -> Result<(), DataManagerError> {
        self.database.delete_workout(workout_id).await
    }

    /// Writes the route of a stored workout to `data/gpx/workout_<id>.gpx`.
    pub async fn export_gpx(&self, workout_id: i64) -> Result<PathBuf, DataManagerError> {
        let workout = self.database.get_workout(workout_id).await?;
        let route = self.database.get_route(workout_id).await?;
        let bytes = gpx_util::write_gpx(&workout, &route)?;

        let gpx_dir = self.root.join(GPX_DIR);
        tokio::fs::create_dir_all(&gpx_dir).await
            .map_err(|_| DataManagerError::Io(format!("Failed to create gpx directory: {:?}", gpx_dir)))?;

        let path = gpx_dir.join(format!("workout_{}.gpx", workout_id));
        tokio::fs::write(&path, bytes).await
            .map_err(|_| DataManagerError::Io(format!("Failed to write gpx file: {:?}", path)))?;

        tracing::info!("Exported workout {} with {} points to {:?}", workout_id, route.len(), path);
        Ok(path)
    }
}

#[async_trait]
impl WorkoutStore for DataManager {
    async fn save_workout(&self, record: &WorkoutRecord, route: &[LocationFix]) -> Result<i64, DataManagerError> {
        let workout_id = self.database.insert_workout(record, route).await?;
        tracing::info!(
            "Saved {} workout {} for user {} ({:.2} km, {} points)",
            record.activity_kind, workout_id, record.user_id, record.distance_km, route.len()
        );
        Ok(workout_id)
    }
}
