use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use workout_tracker_lib::tracking_session::SessionState;

use crate::server_state::ServerState;

/// Publishes a snapshot every `period` while a workout is in progress, so
/// subscribers see the clock move between fixes. Only ever reads the session.
pub async fn run(server_state: Arc<ServerState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        if server_state.tx.receiver_count() == 0 {
            continue;
        }

        let snapshot = server_state.snapshot().await;
        if matches!(snapshot.state, SessionState::Tracking | SessionState::Paused) {
            tracing::trace!("Tick: {:.0}s, {:.3} km", snapshot.elapsed_seconds, snapshot.distance_km);
            let _ = server_state.tx.send(snapshot);
        }
    }
}
