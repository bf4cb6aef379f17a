use chrono::{DateTime, Utc};
use gpx::{Gpx, GpxVersion, Metadata, Time, Track, TrackSegment, Waypoint};
use time::OffsetDateTime;
use workout_tracker_lib::location_fix::LocationFix;

use crate::{DataManagerError, StoredWorkout};

fn gpx_time(timestamp: DateTime<Utc>) -> Option<Time> {
    OffsetDateTime::from_unix_timestamp_nanos(timestamp.timestamp_millis() as i128 * 1_000_000)
        .ok()
        .map(Time::from)
}

/// Renders a stored workout and its route as a GPX 1.1 document with one track.
pub fn write_gpx(workout: &StoredWorkout, route: &[LocationFix]) -> Result<Vec<u8>, DataManagerError> {
    let record = &workout.record;
    let title = format!("{} workout {}", record.activity_kind, workout.workout_id);

    let mut segment = TrackSegment::new();
    for fix in route {
        let mut waypoint = Waypoint::new(fix.position());
        waypoint.elevation = fix.altitude;
        waypoint.time = gpx_time(fix.timestamp);
        segment.points.push(waypoint);
    }

    let mut track = Track::new();
    track.name = Some(title.clone());
    track.description = record.note.clone();
    track.type_ = Some(record.activity_kind.to_string());
    track.segments.push(segment);

    let mut metadata = Metadata::default();
    metadata.name = Some(title);
    metadata.time = gpx_time(record.created_at);

    let mut gpx = Gpx::default();
    gpx.version = GpxVersion::Gpx11;
    gpx.creator = Some("workout_tracker".into());
    gpx.metadata = Some(metadata);
    gpx.tracks.push(track);

    let mut bytes = Vec::new();
    gpx::write(&gpx, &mut bytes)
        .map_err(|err| DataManagerError::Encoding(format!("Failed to write gpx: {}", err)))?;
    Ok(bytes)
}
