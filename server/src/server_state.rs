use std::{collections::VecDeque, sync::Arc};

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use workout_data_management::{DataManager, DataManagerError, WorkoutStore};
use workout_tracker_lib::{
    activity::{ActivityKind, CalorieRates},
    location_fix::LocationFix,
    snapshot::SessionSnapshot,
    tracking_session::{FixOutcome, SessionError, SessionState, TrackingSession},
    workout_record::WorkoutRecord,
};

/// A finished workout the store refused. Queued so it can be retried without
/// re-deriving it.
#[derive(Debug, Clone)]
pub struct PendingWorkout {
    pub record: WorkoutRecord,
    pub route: Vec<LocationFix>,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to store workout: {source}")]
    Store {
        record: WorkoutRecord,
        source: DataManagerError,
    },
    #[error(transparent)]
    Data(DataManagerError),
    #[error("no workout is waiting to be stored")]
    NothingPending,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ControlError::Session(_) => (StatusCode::CONFLICT, Json(json!({ "error": message }))).into_response(),
            ControlError::Store { record, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": message, "record": record }))).into_response()
            }
            ControlError::Data(DataManagerError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ControlError::Data(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response(),
            ControlError::NothingPending => (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response(),
        }
    }
}

/// Everything the handlers share. The live session sits behind a single
/// mutex, which is the only way to mutate it.
pub struct ServerState {
    // Channel used to push snapshots to all live subscribers.
    pub tx: broadcast::Sender<SessionSnapshot>,
    pub data_manager: DataManager,
    pub store: Arc<dyn WorkoutStore>,
    pub rates: CalorieRates,
    session: Mutex<TrackingSession>,
    // Oldest refusal at the front
    pending: Mutex<VecDeque<PendingWorkout>>,
}

impl ServerState {
    pub fn new(data_manager: DataManager, rates: CalorieRates) -> Self {
        let store: Arc<dyn WorkoutStore> = Arc::new(data_manager.clone());
        Self::with_store(data_manager, store, rates)
    }

    pub fn with_store(data_manager: DataManager, store: Arc<dyn WorkoutStore>, rates: CalorieRates) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self {
            tx,
            data_manager,
            store,
            session: Mutex::new(TrackingSession::with_clock(Default::default(), rates.clone())),
            rates,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn fresh_session(&self) -> TrackingSession {
        TrackingSession::with_clock(Default::default(), self.rates.clone())
    }

    fn publish(&self, snapshot: &SessionSnapshot) {
        // No subscribers is fine
        let _ = self.tx.send(snapshot.clone());
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Starts a new workout. A stopped session is replaced by a fresh one first.
    pub async fn start(&self, user_id: i64, activity_kind: ActivityKind) -> Result<SessionSnapshot, ControlError> {
        let mut session = self.session.lock().await;
        if session.state() == SessionState::Stopped {
            *session = self.fresh_session();
        }
        session.start(user_id, activity_kind)?;

        let snapshot = session.snapshot();
        drop(session);

        tracing::info!("User {} started a {} workout", user_id, activity_kind);
        self.publish(&snapshot);
        Ok(snapshot)
    }

    pub async fn pause(&self) -> Result<SessionSnapshot, ControlError> {
        let mut session = self.session.lock().await;
        session.pause()?;
        let snapshot = session.snapshot();
        drop(session);

        tracing::info!("Workout paused at {:.0}s", snapshot.elapsed_seconds);
        self.publish(&snapshot);
        Ok(snapshot)
    }

    pub async fn resume(&self) -> Result<SessionSnapshot, ControlError> {
        let mut session = self.session.lock().await;
        session.resume()?;
        let snapshot = session.snapshot();
        drop(session);

        tracing::info!("Workout resumed");
        self.publish(&snapshot);
        Ok(snapshot)
    }

    pub async fn ingest(&self, fix: LocationFix) -> FixOutcome {
        let mut session = self.session.lock().await;
        let outcome = session.on_location_fix(fix);
        if outcome == FixOutcome::Accepted {
            let snapshot = session.snapshot();
            drop(session);
            self.publish(&snapshot);
        }
        outcome
    }

    /// Stops the workout and hands the record to the store. The store is only
    /// called once the session lock is released.
    pub async fn stop(&self, note: Option<String>) -> Result<(i64, WorkoutRecord), ControlError> {
        let mut session = self.session.lock().await;
        let record = session.stop(note)?;
        let route = session.location_history().to_vec();
        let snapshot = session.snapshot();
        drop(session);

        self.publish(&snapshot);
        tracing::info!(
            "Workout stopped: {}s, {:.2} km, {:.0} kcal",
            record.duration_seconds, record.distance_km, record.calories_estimate
        );

        match self.persist(PendingWorkout { record, route }).await {
            Ok(saved) => Ok(saved),
            Err((pending, source)) => {
                let record = pending.record.clone();
                self.pending.lock().await.push_back(pending);
                Err(ControlError::Store { record, source })
            }
        }
    }

    /// Retries the oldest workout the store refused. If the store still fails
    /// it goes back to the front of the queue.
    pub async fn retry_pending(&self) -> Result<(i64, WorkoutRecord), ControlError> {
        let pending = self.pending.lock().await.pop_front().ok_or(ControlError::NothingPending)?;
        tracing::info!("Retrying storage of workout for user {}", pending.record.user_id);

        match self.persist(pending).await {
            Ok(saved) => Ok(saved),
            Err((pending, source)) => {
                let record = pending.record.clone();
                self.pending.lock().await.push_front(pending);
                Err(ControlError::Store { record, source })
            }
        }
    }

    /// Records still waiting to be stored, oldest first.
    pub async fn pending(&self) -> Vec<WorkoutRecord> {
        self.pending.lock().await.iter().map(|pending| pending.record.clone()).collect()
    }

    async fn persist(&self, pending: PendingWorkout) -> Result<(i64, WorkoutRecord), (PendingWorkout, DataManagerError)> {
        match self.store.save_workout(&pending.record, &pending.route).await {
            Ok(workout_id) => Ok((workout_id, pending.record)),
            Err(source) => {
                tracing::error!("Failed to store workout for user {}: {}", pending.record.user_id, source);
                Err((pending, source))
            }
        }
    }

    /// Throws away the current session without producing a record.
    pub async fn abandon(&self) -> SessionSnapshot {
        let mut session = self.session.lock().await;
        if matches!(session.state(), SessionState::Tracking | SessionState::Paused) {
            tracing::warn!("Abandoning workout after {:.0}s", session.elapsed_seconds());
        }
        *session = self.fresh_session();
        let snapshot = session.snapshot();
        drop(session);

        self.publish(&snapshot);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};

    use super::*;

    /// Fails until told otherwise.
    struct FlakyStore {
        inner: DataManager,
        failing: AtomicBool,
    }

    #[async_trait]
    impl WorkoutStore for FlakyStore {
        async fn save_workout(&self, record: &WorkoutRecord, route: &[LocationFix]) -> Result<i64, DataManagerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DataManagerError::Database("disk full".into()));
            }
            self.inner.save_workout(record, route).await
        }
    }

    async fn state() -> ServerState {
        let data_manager = DataManager::in_memory(std::env::temp_dir()).await.unwrap();
        ServerState::new(data_manager, CalorieRates::default())
    }

    #[tokio::test]
    async fn full_workout_is_stored() {
        let state = state().await;
        let mut rx = state.tx.subscribe();

        state.start(1, ActivityKind::Running).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().state, SessionState::Tracking);

        let now = Utc::now();
        assert_eq!(state.ingest(LocationFix::new(0.0, 0.0, now).with_speed(4.0)).await, FixOutcome::Accepted);
        assert_eq!(
            state.ingest(LocationFix::new(0.0, 0.0001, now + TimeDelta::seconds(1)).with_speed(4.0)).await,
            FixOutcome::Accepted
        );
        assert_eq!(rx.recv().await.unwrap().fix_count, 1);

        let (workout_id, record) = state.stop(None).await.unwrap();
        let stored = state.data_manager.get_workout(workout_id).await.unwrap();
        assert_eq!(stored.record, record);
        assert_eq!(state.data_manager.get_route(workout_id).await.unwrap().len(), 2);
        assert_eq!(state.snapshot().await.state, SessionState::Stopped);
    }

    #[tokio::test]
    async fn invalid_transitions_are_reported() {
        let state = state().await;
        assert!(matches!(state.pause().await, Err(ControlError::Session(_))));
        assert!(matches!(state.stop(None).await, Err(ControlError::Session(_))));

        state.start(1, ActivityKind::Walking).await.unwrap();
        assert!(matches!(state.start(1, ActivityKind::Walking).await, Err(ControlError::Session(_))));
        assert!(matches!(state.resume().await, Err(ControlError::Session(_))));
    }

    #[tokio::test]
    async fn stopped_session_is_replaced_on_start() {
        let state = state().await;
        state.start(1, ActivityKind::Cycling).await.unwrap();
        state.stop(None).await.unwrap();

        let snapshot = state.start(2, ActivityKind::Walking).await.unwrap();
        assert_eq!(snapshot.state, SessionState::Tracking);
        assert_eq!(snapshot.activity_kind, Some(ActivityKind::Walking));
        assert_eq!(snapshot.fix_count, 0);
    }

    #[tokio::test]
    async fn failed_store_keeps_record_for_retry() {
        let data_manager = DataManager::in_memory(std::env::temp_dir()).await.unwrap();
        let store = Arc::new(FlakyStore { inner: data_manager.clone(), failing: AtomicBool::new(true) });
        let state = ServerState::with_store(data_manager, store.clone(), CalorieRates::default());

        state.start(4, ActivityKind::Swimming).await.unwrap();
        let Err(ControlError::Store { record, .. }) = state.stop(Some("pool".into())).await else {
            panic!("expected store failure");
        };
        assert_eq!(state.pending().await, vec![record.clone()]);

        // Still failing: record stays pending
        assert!(matches!(state.retry_pending().await, Err(ControlError::Store { .. })));
        assert_eq!(state.pending().await.len(), 1);

        store.failing.store(false, Ordering::SeqCst);
        let (workout_id, retried) = state.retry_pending().await.unwrap();
        assert_eq!(retried, record);
        assert!(state.pending().await.is_empty());
        assert_eq!(state.data_manager.get_workout(workout_id).await.unwrap().record.note.as_deref(), Some("pool"));

        assert!(matches!(state.retry_pending().await, Err(ControlError::NothingPending)));
    }

    #[tokio::test]
    async fn every_refused_workout_is_kept_in_order() {
        let data_manager = DataManager::in_memory(std::env::temp_dir()).await.unwrap();
        let store = Arc::new(FlakyStore { inner: data_manager.clone(), failing: AtomicBool::new(true) });
        let state = ServerState::with_store(data_manager, store.clone(), CalorieRates::default());

        for note in ["first", "second"] {
            state.start(7, ActivityKind::Running).await.unwrap();
            assert!(matches!(state.stop(Some(note.into())).await, Err(ControlError::Store { .. })));
        }
        let notes = |records: Vec<WorkoutRecord>| records.into_iter().filter_map(|r| r.note).collect::<Vec<_>>();
        assert_eq!(notes(state.pending().await), vec!["first", "second"]);

        // A failed retry keeps the oldest at the front
        assert!(matches!(state.retry_pending().await, Err(ControlError::Store { .. })));
        assert_eq!(notes(state.pending().await), vec!["first", "second"]);

        store.failing.store(false, Ordering::SeqCst);
        let mut recovered = Vec::new();
        loop {
            match state.retry_pending().await {
                Ok((_, record)) => recovered.push(record),
                Err(ControlError::NothingPending) => break,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!(notes(recovered), vec!["first", "second"]);

        let stored = state.data_manager.get_user_workouts(7).await.unwrap();
        let mut stored_notes: Vec<_> = stored.into_iter().filter_map(|w| w.record.note).collect();
        stored_notes.sort();
        assert_eq!(stored_notes, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn abandon_drops_the_workout() {
        let state = state().await;
        state.start(1, ActivityKind::Running).await.unwrap();
        state.ingest(LocationFix::new(1.0, 1.0, Utc::now())).await;

        let snapshot = state.abandon().await;
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(state.data_manager.get_user_workouts(1).await.unwrap().is_empty());
        assert!(state.pending().await.is_empty());
    }

    #[tokio::test]
    async fn fixes_while_paused_do_not_publish() {
        let state = state().await;
        state.start(1, ActivityKind::Running).await.unwrap();
        state.pause().await.unwrap();

        let mut rx = state.tx.subscribe();
        assert_eq!(state.ingest(LocationFix::new(1.0, 1.0, Utc::now())).await, FixOutcome::NotTracking);
        assert!(rx.try_recv().is_err());
    }
}
