pub const WORKOUTS_TABLE_NAME: &str = "Workouts";
pub const WORKOUT_ID: &str = "workout_id";
pub const USER_ID: &str = "user_id";
pub const ACTIVITY_KIND: &str = "activity_kind";
pub const DURATION_SECONDS: &str = "duration_seconds";
pub const DISTANCE_KM: &str = "distance_km";
pub const AVERAGE_SPEED_KMH: &str = "average_speed_kmh";
pub const MAX_SPEED_KMH: &str = "max_speed_kmh";
pub const CALORIES_ESTIMATE: &str = "calories_estimate";
pub const CREATED_AT: &str = "created_at";
pub const NOTE: &str = "note";
pub const ROUTE: &str = "route";
