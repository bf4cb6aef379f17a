use std::sync::Arc;

use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use workout_data_management::StoredWorkout;
use workout_tracker_lib::{
    activity::ActivityKind, location_fix::LocationFix, snapshot::SessionSnapshot, tracking_session::FixOutcome,
    workout_record::WorkoutRecord,
};

use crate::server_state::{ControlError, ServerState};

#[derive(Deserialize, Serialize, Debug)]
pub struct StartRequest {
    pub user_id: i64,
    pub activity_kind: ActivityKind,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct StopRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct SavedWorkout {
    pub workout_id: i64,
    pub record: WorkoutRecord,
}

pub fn router(server_state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/session", delete(abandon_session))
        .route("/session/start", post(start_session))
        .route("/session/pause", post(pause_session))
        .route("/session/resume", post(resume_session))
        .route("/session/stop", post(stop_session))
        .route("/session/fix", post(post_fix))
        .route("/session/snapshot", get(get_snapshot))
        .route("/session/live", get(live_snapshots))
        .route("/workouts/retry", post(retry_pending))
        .route("/workouts/{user_id}", get(get_user_workouts))
        .route("/workout/{workout_id}", get(get_workout))
        .route("/workout/{workout_id}/gpx", post(export_gpx))
        .with_state(server_state)
        .layer(TraceLayer::new_for_http())
}

async fn start_session(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<SessionSnapshot>, ControlError> {
    state.start(request.user_id, request.activity_kind).await.map(Json)
}

async fn pause_session(State(state): State<Arc<ServerState>>) -> Result<Json<SessionSnapshot>, ControlError> {
    state.pause().await.map(Json)
}

async fn resume_session(State(state): State<Arc<ServerState>>) -> Result<Json<SessionSnapshot>, ControlError> {
    state.resume().await.map(Json)
}

async fn stop_session(
    State(state): State<Arc<ServerState>>,
    request: Option<Json<StopRequest>>,
) -> Result<Json<SavedWorkout>, ControlError> {
    let note = request.and_then(|Json(request)| request.note);
    let (workout_id, record) = state.stop(note).await?;
    Ok(Json(SavedWorkout { workout_id, record }))
}

async fn retry_pending(State(state): State<Arc<ServerState>>) -> Result<Json<SavedWorkout>, ControlError> {
    let (workout_id, record) = state.retry_pending().await?;
    Ok(Json(SavedWorkout { workout_id, record }))
}

async fn abandon_session(State(state): State<Arc<ServerState>>) -> Json<SessionSnapshot> {
    Json(state.abandon().await)
}

/// Never an error: a dropped fix is answered with 202 instead of 200.
async fn post_fix(State(state): State<Arc<ServerState>>, Json(fix): Json<LocationFix>) -> StatusCode {
    match state.ingest(fix).await {
        FixOutcome::Accepted => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    }
}

async fn get_snapshot(State(state): State<Arc<ServerState>>) -> Json<SessionSnapshot> {
    Json(state.snapshot().await)
}

async fn get_user_workouts(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<StoredWorkout>>, ControlError> {
    state.data_manager.get_user_workouts(user_id).await.map(Json).map_err(ControlError::Data)
}

async fn get_workout(
    State(state): State<Arc<ServerState>>,
    Path(workout_id): Path<i64>,
) -> Result<Json<StoredWorkout>, ControlError> {
    state.data_manager.get_workout(workout_id).await.map(Json).map_err(ControlError::Data)
}

async fn export_gpx(State(state): State<Arc<ServerState>>, Path(workout_id): Path<i64>) -> Result<Response, ControlError> {
    let path = state.data_manager.export_gpx(workout_id).await.map_err(ControlError::Data)?;
    Ok(Json(path.display().to_string()).into_response())
}

async fn live_snapshots(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| stream_snapshots(socket, state))
}

/// Sends the current snapshot, then every published one, until the client
/// goes away.
async fn stream_snapshots(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut rx = state.tx.subscribe();

    if send_snapshot(&mut socket, &state.snapshot().await).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            snapshot = rx.recv() => {
                match snapshot {
                    Ok(snapshot) => {
                        if send_snapshot(&mut socket, &snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => tracing::debug!("Live subscriber lagged by {} snapshots", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("Live subscriber disconnected");
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &SessionSnapshot) -> Result<(), anyhow::Error> {
    let json = serde_json::to_string(snapshot)?;
    socket.send(Message::Text(json.into())).await?;
    Ok(())
}
