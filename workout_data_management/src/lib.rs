use const_format::concatcp;
use thiserror::Error;

pub mod database;
mod gpx_util;
mod data_manager;
mod stored_workout;
mod workout_store;

pub use data_manager::*;
pub use stored_workout::StoredWorkout;
pub use workout_store::WorkoutStore;

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "database.db");
pub const GPX_DIR: &str = concatcp!(DATA_DIR, "gpx");

#[derive(Error, Debug)]
pub enum DataManagerError {
    #[error("database error: {0}")]
    Database(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("workout {0} not found")]
    NotFound(i64),
}
