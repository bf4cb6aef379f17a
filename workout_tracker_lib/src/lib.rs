pub mod activity;
pub mod clock;
pub mod geo;
pub mod location_fix;
pub mod snapshot;
pub mod tracking_session;
pub mod workout_record;
