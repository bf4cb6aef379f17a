use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    activity::{ActivityKind, CalorieRates},
    clock::{Clock, SystemClock},
    geo::haversine_distance,
    location_fix::LocationFix,
    snapshot::{Pace, SessionSnapshot},
    workout_record::WorkoutRecord,
};

const MPS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Tracking,
    Paused,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Tracking => "tracking",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        })
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

/// What happened to a fix handed to [`TrackingSession::on_location_fix`].
/// Dropped fixes are routine, so this is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    Accepted,
    /// The session is not tracking (idle, paused or stopped).
    NotTracking,
    /// Timestamp at or before the last accepted fix.
    OutOfOrder,
    /// Coordinates outside the valid range.
    Invalid,
}

/// Running totals for one start-to-stop lifecycle.
#[derive(Debug, Clone)]
struct SessionAggregate {
    user_id: i64,
    activity_kind: ActivityKind,
    started_at: DateTime<Utc>,
    accumulated_pause: TimeDelta,
    last_paused_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    total_distance_meters: f64,
    location_history: Vec<LocationFix>,
    current_speed_kmh: f64,
    max_speed_kmh: f64,
    last_fix_timestamp: Option<DateTime<Utc>>,
}

impl SessionAggregate {
    fn new(user_id: i64, activity_kind: ActivityKind, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            activity_kind,
            started_at,
            accumulated_pause: TimeDelta::zero(),
            last_paused_at: None,
            stopped_at: None,
            total_distance_meters: 0.0,
            location_history: Vec::new(),
            current_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
            last_fix_timestamp: None,
        }
    }

    /// Active time up to `now`. Frozen at the stop instant once stopped.
    fn active_duration(&self, now: DateTime<Utc>) -> TimeDelta {
        let now = self.stopped_at.unwrap_or(now);
        let open_pause = self
            .last_paused_at
            .map(|paused_at| (now - paused_at).max(TimeDelta::zero()))
            .unwrap_or_else(TimeDelta::zero);

        (now - self.started_at - self.accumulated_pause - open_pause).max(TimeDelta::zero())
    }
}

/// Metrics derived from the aggregate at a given instant.
struct DerivedMetrics {
    elapsed_seconds: f64,
    distance_km: f64,
    average_speed_kmh: f64,
    pace: Pace,
    calories_estimate: f64,
}

/// A single GPS workout, from `start` to `stop`.
///
/// The session is a plain single-owner value: every mutating method takes
/// `&mut self`. Hosts that feed fixes from one thread and control calls from
/// another must put it behind one lock.
pub struct TrackingSession<C: Clock = SystemClock> {
    clock: C,
    rates: CalorieRates,
    state: SessionState,
    aggregate: Option<SessionAggregate>,
}

impl TrackingSession<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock, CalorieRates::default())
    }
}

impl Default for TrackingSession<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TrackingSession<C> {
    pub fn with_clock(clock: C, rates: CalorieRates) -> Self {
        Self {
            clock,
            rates,
            state: SessionState::Idle,
            aggregate: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn activity_kind(&self) -> Option<ActivityKind> {
        self.aggregate.as_ref().map(|aggregate| aggregate.activity_kind)
    }

    pub fn total_distance_meters(&self) -> f64 {
        self.aggregate.as_ref().map_or(0.0, |aggregate| aggregate.total_distance_meters)
    }

    /// Accepted fixes in arrival order. Still readable after `stop` so the
    /// route can be stored next to the record.
    pub fn location_history(&self) -> &[LocationFix] {
        self.aggregate
            .as_ref()
            .map(|aggregate| aggregate.location_history.as_slice())
            .unwrap_or_default()
    }

    pub fn start(&mut self, user_id: i64, activity_kind: ActivityKind) -> Result<(), SessionError> {
        self.expect_state("start", &[SessionState::Idle])?;

        let now = self.clock.now();
        self.aggregate = Some(SessionAggregate::new(user_id, activity_kind, now));
        self.state = SessionState::Tracking;

        tracing::debug!("Started {} session for user {} at {}", activity_kind, user_id, now);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.expect_state("pause", &[SessionState::Tracking])?;
        let now = self.clock.now();
        let aggregate = self.aggregate_mut("pause")?;

        aggregate.last_paused_at = Some(now);
        self.state = SessionState::Paused;

        tracing::debug!("Paused session at {}", now);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.expect_state("resume", &[SessionState::Paused])?;
        let now = self.clock.now();
        let aggregate = self.aggregate_mut("resume")?;

        if let Some(paused_at) = aggregate.last_paused_at.take() {
            aggregate.accumulated_pause += (now - paused_at).max(TimeDelta::zero());
        }
        self.state = SessionState::Tracking;

        tracing::debug!("Resumed session at {}", now);
        Ok(())
    }

    /// Finishes the session and produces its record. A session that never
    /// accepted a fix still yields a record, with zero distance.
    pub fn stop(&mut self, note: Option<String>) -> Result<WorkoutRecord, SessionError> {
        self.expect_state("stop", &[SessionState::Tracking, SessionState::Paused])?;
        let now = self.clock.now();
        let aggregate = self.aggregate_mut("stop")?;

        if let Some(paused_at) = aggregate.last_paused_at.take() {
            aggregate.accumulated_pause += (now - paused_at).max(TimeDelta::zero());
        }
        aggregate.stopped_at = Some(now);
        self.state = SessionState::Stopped;

        let Some(aggregate) = self.aggregate.as_ref() else {
            return Err(self.invalid("stop"));
        };
        let metrics = self.metrics(aggregate, now);

        let record = WorkoutRecord {
            user_id: aggregate.user_id,
            activity_kind: aggregate.activity_kind,
            duration_seconds: aggregate.active_duration(now).num_seconds(),
            distance_km: metrics.distance_km,
            average_speed_kmh: metrics.average_speed_kmh,
            max_speed_kmh: aggregate.max_speed_kmh,
            calories_estimate: metrics.calories_estimate,
            created_at: now,
            note,
        };

        tracing::debug!(
            "Stopped session: {}s, {:.3} km, {} fixes",
            record.duration_seconds,
            record.distance_km,
            aggregate.location_history.len()
        );
        Ok(record)
    }

    /// Feeds one fix into the session. Never fails: fixes that arrive while
    /// not tracking, out of order or with an impossible position are dropped
    /// without touching any aggregate.
    pub fn on_location_fix(&mut self, fix: LocationFix) -> FixOutcome {
        if self.state != SessionState::Tracking {
            tracing::trace!("Dropping fix while {}", self.state);
            return FixOutcome::NotTracking;
        }
        let Some(aggregate) = self.aggregate.as_mut() else {
            return FixOutcome::NotTracking;
        };

        if aggregate.last_fix_timestamp.is_some_and(|last| fix.timestamp <= last) {
            tracing::trace!("Dropping out of order fix at {}", fix.timestamp);
            return FixOutcome::OutOfOrder;
        }

        if !fix.has_valid_position() {
            tracing::trace!("Dropping fix with invalid position ({}, {})", fix.latitude, fix.longitude);
            return FixOutcome::Invalid;
        }

        if let Some(previous) = aggregate.location_history.last() {
            aggregate.total_distance_meters += haversine_distance(previous.coordinates(), fix.coordinates());
        }

        aggregate.current_speed_kmh = fix.speed_mps() * MPS_TO_KMH;
        if aggregate.current_speed_kmh > aggregate.max_speed_kmh {
            aggregate.max_speed_kmh = aggregate.current_speed_kmh;
        }

        aggregate.last_fix_timestamp = Some(fix.timestamp);
        aggregate.location_history.push(fix);

        FixOutcome::Accepted
    }

    /// Elapsed active time in seconds, excluding every pause.
    pub fn elapsed_seconds(&self) -> f64 {
        self.aggregate
            .as_ref()
            .map_or(0.0, |aggregate| seconds(aggregate.active_duration(self.clock.now())))
    }

    /// Pure read, valid in every state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let Some(aggregate) = self.aggregate.as_ref() else {
            return SessionSnapshot::idle();
        };
        let metrics = self.metrics(aggregate, self.clock.now());

        SessionSnapshot {
            state: self.state,
            activity_kind: Some(aggregate.activity_kind),
            elapsed_seconds: metrics.elapsed_seconds,
            distance_km: metrics.distance_km,
            current_speed_kmh: aggregate.current_speed_kmh,
            max_speed_kmh: aggregate.max_speed_kmh,
            average_speed_kmh: metrics.average_speed_kmh,
            pace: metrics.pace,
            calories_estimate: metrics.calories_estimate,
            altitude_meters: aggregate.location_history.last().and_then(|fix| fix.altitude),
            fix_count: aggregate.location_history.len(),
        }
    }

    fn metrics(&self, aggregate: &SessionAggregate, now: DateTime<Utc>) -> DerivedMetrics {
        let elapsed_seconds = seconds(aggregate.active_duration(now));
        let distance_km = aggregate.total_distance_meters / 1000.0;

        let average_speed_kmh = if elapsed_seconds > 0.0 {
            distance_km / (elapsed_seconds / 3600.0)
        } else {
            0.0
        };

        DerivedMetrics {
            elapsed_seconds,
            distance_km,
            average_speed_kmh,
            pace: Pace::from_elapsed(elapsed_seconds, distance_km),
            calories_estimate: self
                .rates
                .estimate(aggregate.activity_kind, elapsed_seconds / 3600.0, distance_km),
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            tracing::debug!("Rejected {} while {}", operation, self.state);
            Err(self.invalid(operation))
        }
    }

    fn aggregate_mut(&mut self, operation: &'static str) -> Result<&mut SessionAggregate, SessionError> {
        let state = self.state;
        self.aggregate
            .as_mut()
            .ok_or(SessionError::InvalidState { operation, state })
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

fn seconds(duration: TimeDelta) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const EPS: f64 = 1e-9;

    fn start_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_714_550_400, 0).unwrap()
    }

    fn session() -> (TrackingSession<ManualClock>, ManualClock) {
        let clock = ManualClock::new(start_time());
        (TrackingSession::with_clock(clock.clone(), CalorieRates::default()), clock)
    }

    fn fix_at(secs: i64, lat: f64, lon: f64, speed: f64) -> LocationFix {
        LocationFix::new(lat, lon, start_time() + TimeDelta::seconds(secs)).with_speed(speed)
    }

    fn aggregates(session: &TrackingSession<ManualClock>) -> (u64, u64, u64, usize) {
        let snapshot = session.snapshot();
        (
            session.total_distance_meters().to_bits(),
            snapshot.current_speed_kmh.to_bits(),
            snapshot.max_speed_kmh.to_bits(),
            snapshot.fix_count,
        )
    }

    #[test]
    fn example_run_with_pause() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();

        assert_eq!(session.on_location_fix(fix_at(0, 0.0, 0.0, 4.0)), FixOutcome::Accepted);
        clock.advance_secs(1);
        assert_eq!(session.on_location_fix(fix_at(1, 0.0, 0.0001, 4.0)), FixOutcome::Accepted);

        assert!((session.total_distance_meters() - 11.1).abs() < 0.1);
        let snapshot = session.snapshot();
        assert!((snapshot.current_speed_kmh - 14.4).abs() < EPS);
        assert!((snapshot.max_speed_kmh - 14.4).abs() < EPS);

        session.pause().unwrap();
        clock.advance_secs(10);
        session.resume().unwrap();

        let record = session.stop(None).unwrap();
        assert_eq!(record.duration_seconds, 1);
        assert!((record.distance_km - 0.0111).abs() < 0.0001);
        assert!((record.max_speed_kmh - 14.4).abs() < EPS);
        assert_eq!(record.user_id, 1);
        assert_eq!(record.activity_kind, ActivityKind::Running);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn out_of_order_fix_leaves_aggregates_untouched() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Cycling).unwrap();
        session.on_location_fix(fix_at(0, 55.0, 10.0, 5.0));
        clock.advance_secs(5);
        session.on_location_fix(fix_at(5, 55.0005, 10.0, 6.0));

        let before = aggregates(&session);
        assert_eq!(session.on_location_fix(fix_at(3, 55.01, 10.01, 20.0)), FixOutcome::OutOfOrder);
        assert_eq!(aggregates(&session), before);

        // Duplicate timestamp is dropped too
        assert_eq!(session.on_location_fix(fix_at(5, 55.02, 10.0, 20.0)), FixOutcome::OutOfOrder);
        assert_eq!(aggregates(&session), before);
    }

    #[test]
    fn fixes_while_paused_or_idle_are_dropped() {
        let (mut session, clock) = session();
        assert_eq!(session.on_location_fix(fix_at(0, 0.0, 0.0, 3.0)), FixOutcome::NotTracking);
        assert_eq!(session.snapshot(), SessionSnapshot::idle());

        session.start(1, ActivityKind::Walking).unwrap();
        session.on_location_fix(fix_at(1, 0.0, 0.0, 1.5));
        session.pause().unwrap();

        let before = aggregates(&session);
        clock.advance_secs(2);
        assert_eq!(session.on_location_fix(fix_at(2, 0.001, 0.0, 9.0)), FixOutcome::NotTracking);
        assert_eq!(aggregates(&session), before);
    }

    #[test]
    fn invalid_position_is_dropped() {
        let (mut session, _clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        session.on_location_fix(fix_at(0, 10.0, 10.0, 3.0));

        let before = aggregates(&session);
        assert_eq!(session.on_location_fix(fix_at(1, 91.0, 10.0, 3.0)), FixOutcome::Invalid);
        assert_eq!(session.on_location_fix(fix_at(2, f64::NAN, 10.0, 3.0)), FixOutcome::Invalid);
        assert_eq!(aggregates(&session), before);

        // A rejected fix does not advance the last timestamp
        assert_eq!(session.on_location_fix(fix_at(1, 10.0, 10.001, 3.0)), FixOutcome::Accepted);
    }

    #[test]
    fn distance_is_sum_of_consecutive_haversine_legs() {
        let (mut session, clock) = session();
        session.start(7, ActivityKind::Running).unwrap();

        let points = [(55.0, 10.0), (55.0003, 10.0002), (55.0007, 10.0001), (55.0007, 10.0009), (55.0001, 10.0009)];
        let mut expected = 0.0;
        let mut last_distance = 0.0;
        for (i, &(lat, lon)) in points.iter().enumerate() {
            if i > 0 {
                expected += haversine_distance(points[i - 1], (lat, lon));
            }
            clock.advance_secs(1);
            session.on_location_fix(fix_at(i as i64, lat, lon, 3.0));

            assert!(session.total_distance_meters() >= last_distance);
            last_distance = session.total_distance_meters();
        }

        assert!((session.total_distance_meters() - expected).abs() < 1e-6);
        assert_eq!(session.location_history().len(), points.len());
    }

    #[test]
    fn max_speed_tracks_highest_accepted_speed() {
        let (mut session, _clock) = session();
        session.start(1, ActivityKind::Cycling).unwrap();

        session.on_location_fix(fix_at(0, 0.0, 0.0, 10.0));
        session.on_location_fix(fix_at(1, 0.0, 0.0001, 5.0));
        session.on_location_fix(fix_at(2, 0.0, 0.0002, -2.0));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.current_speed_kmh, 0.0);
        assert!((snapshot.max_speed_kmh - 36.0).abs() < EPS);
    }

    #[test]
    fn pause_then_resume_without_time_passing_keeps_elapsed() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        clock.advance_secs(42);

        let before = session.elapsed_seconds();
        session.pause().unwrap();
        session.resume().unwrap();
        assert_eq!(session.elapsed_seconds(), before);
    }

    #[test]
    fn elapsed_does_not_grow_while_paused() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        clock.advance_secs(30);
        session.pause().unwrap();

        let at_pause = session.elapsed_seconds();
        for _ in 0..5 {
            clock.advance_secs(60);
            assert_eq!(session.elapsed_seconds(), at_pause);
        }
        assert_eq!(at_pause, 30.0);

        session.resume().unwrap();
        clock.advance_secs(15);
        assert_eq!(session.elapsed_seconds(), 45.0);
    }

    #[test]
    fn stop_without_fixes_yields_base_calories_only() {
        let (mut session, clock) = session();
        session.start(3, ActivityKind::Walking).unwrap();
        clock.advance_secs(1800);

        let record = session.stop(Some("treadmill".into())).unwrap();
        assert_eq!(record.duration_seconds, 1800);
        assert_eq!(record.distance_km, 0.0);
        assert_eq!(record.average_speed_kmh, 0.0);
        assert!((record.calories_estimate - 150.0).abs() < EPS);
        assert_eq!(record.note.as_deref(), Some("treadmill"));
        assert!(record.is_degenerate());
    }

    #[test]
    fn stop_while_paused_excludes_open_pause() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        clock.advance_secs(20);
        session.pause().unwrap();
        clock.advance_secs(100);

        let record = session.stop(None).unwrap();
        assert_eq!(record.duration_seconds, 20);
        assert_eq!(record.created_at, start_time() + TimeDelta::seconds(120));
    }

    #[test]
    fn invalid_transitions_do_not_mutate() {
        let (mut session, clock) = session();

        assert_eq!(
            session.pause(),
            Err(SessionError::InvalidState { operation: "pause", state: SessionState::Idle })
        );
        assert!(session.resume().is_err());
        assert!(session.stop(None).is_err());
        assert_eq!(session.state(), SessionState::Idle);

        session.start(1, ActivityKind::Running).unwrap();
        session.on_location_fix(fix_at(0, 0.0, 0.0, 2.0));
        clock.advance_secs(10);

        let before = (aggregates(&session), session.elapsed_seconds());
        assert_eq!(
            session.start(2, ActivityKind::Cycling),
            Err(SessionError::InvalidState { operation: "start", state: SessionState::Tracking })
        );
        assert!(session.resume().is_err());
        assert_eq!((aggregates(&session), session.elapsed_seconds()), before);
        assert_eq!(session.activity_kind(), Some(ActivityKind::Running));

        session.pause().unwrap();
        let before = (aggregates(&session), session.elapsed_seconds());
        assert!(session.pause().is_err());
        assert!(session.start(2, ActivityKind::Cycling).is_err());
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!((aggregates(&session), session.elapsed_seconds()), before);
    }

    #[test]
    fn stopped_session_is_inert() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        session.on_location_fix(fix_at(0, 0.0, 0.0, 2.0));
        clock.advance_secs(60);
        session.stop(None).unwrap();

        let frozen = session.snapshot();
        clock.advance_secs(60);
        assert_eq!(session.snapshot(), frozen);
        assert_eq!(frozen.elapsed_seconds, 60.0);

        assert_eq!(session.on_location_fix(fix_at(61, 0.0, 0.001, 2.0)), FixOutcome::NotTracking);
        assert!(session.start(1, ActivityKind::Running).is_err());
        assert!(session.pause().is_err());
        assert!(session.resume().is_err());
        assert!(session.stop(None).is_err());
        assert_eq!(session.location_history().len(), 1);
    }

    #[test]
    fn snapshot_reports_derived_metrics() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        session.on_location_fix(fix_at(0, 0.0, 0.0, 3.0).with_altitude(20.0));
        clock.advance_secs(360);
        // ~1.112 km east along the equator
        session.on_location_fix(fix_at(360, 0.0, 0.01, 3.0).with_altitude(25.0));

        let snapshot = session.snapshot();
        let distance_km = haversine_distance((0.0, 0.0), (0.0, 0.01)) / 1000.0;
        assert_eq!(snapshot.state, SessionState::Tracking);
        assert_eq!(snapshot.elapsed_seconds, 360.0);
        assert!((snapshot.distance_km - distance_km).abs() < EPS);
        assert!((snapshot.average_speed_kmh - distance_km * 10.0).abs() < EPS);
        assert!((snapshot.pace.minutes_per_km().unwrap() - 6.0 / distance_km).abs() < EPS);
        assert!((snapshot.calories_estimate - (60.0 + 60.0 * distance_km)).abs() < EPS);
        assert_eq!(snapshot.altitude_meters, Some(25.0));
        assert_eq!(snapshot.fix_count, 2);
    }

    #[test]
    fn zero_elapsed_has_no_average_or_pace() {
        let (mut session, _clock) = session();
        session.start(1, ActivityKind::Other).unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.elapsed_seconds, 0.0);
        assert_eq!(snapshot.average_speed_kmh, 0.0);
        assert_eq!(snapshot.pace, Pace::NotAvailable);
    }

    #[test]
    fn clock_going_backwards_clamps_elapsed() {
        let (mut session, clock) = session();
        session.start(1, ActivityKind::Running).unwrap();
        clock.set(start_time() - TimeDelta::seconds(30));
        assert_eq!(session.elapsed_seconds(), 0.0);
    }
}
