use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, mpsc::error::TrySendError, watch};
use tracing::{debug, warn};

use greenhouse_common::{
    settings_table, EquipmentRequest, FogRequest, HistoryEntry, RemoteCommand, Settings,
    TelemetryPayload, WindowRequest,
};

/// Handlers read the control loop's published snapshots and write only
/// through the command queue.
#[derive(Clone)]
pub struct WebState {
    pub commands: mpsc::Sender<RemoteCommand>,
    pub settings: watch::Receiver<Settings>,
    pub telemetry: watch::Receiver<Option<TelemetryPayload>>,
    pub history: watch::Receiver<Vec<HistoryEntry>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct QueuedBody {
    queued: &'static str,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route(
            "/api/settings",
            get(handle_get_settings).put(handle_put_settings),
        )
        .route("/api/equipment", post(handle_post_equipment))
        .route("/api/fog", post(handle_post_fog))
        .route("/api/window", post(handle_post_window))
        .route("/api/hydro/toggle", post(handle_post_hydro_toggle))
        .route("/api/history", get(handle_get_history))
        .with_state(state)
}

async fn handle_get_status(State(state): State<WebState>) -> impl IntoResponse {
    let telemetry = state.telemetry.borrow().clone();
    match telemetry {
        Some(payload) => Json(payload).into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Controller has not completed a tick yet",
        ),
    }
}

async fn handle_get_settings(State(state): State<WebState>) -> impl IntoResponse {
    let settings = state.settings.borrow().clone();
    Json(settings)
}

async fn handle_put_settings(
    State(state): State<WebState>,
    Json(updates): Json<Map<String, Value>>,
) -> impl IntoResponse {
    // The control loop applies the same update to its own copy; this run only
    // reports per-field results.
    let mut preview = state.settings.borrow().clone();
    let report = settings_table::apply_update(&mut preview, &updates);
    if !report.changed() {
        debug!("settings update rejected: {:?}", report.rejected);
        return (StatusCode::BAD_REQUEST, Json(report)).into_response();
    }

    if let Err(response) = enqueue(&state, RemoteCommand::UpdateSettings(updates)) {
        return response;
    }
    Json(report).into_response()
}

async fn handle_post_equipment(
    State(state): State<WebState>,
    Json(request): Json<EquipmentRequest>,
) -> impl IntoResponse {
    match RemoteCommand::try_from(request) {
        Ok(command) => accepted(&state, command),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn handle_post_fog(
    State(state): State<WebState>,
    Json(request): Json<FogRequest>,
) -> impl IntoResponse {
    accepted(&state, request.into())
}

async fn handle_post_window(
    State(state): State<WebState>,
    Json(request): Json<WindowRequest>,
) -> impl IntoResponse {
    accepted(&state, request.into())
}

async fn handle_post_hydro_toggle(State(state): State<WebState>) -> impl IntoResponse {
    accepted(&state, RemoteCommand::ToggleHydroMix)
}

async fn handle_get_history(State(state): State<WebState>) -> impl IntoResponse {
    let entries = state.history.borrow().clone();
    Json(entries)
}

fn accepted(state: &WebState, command: RemoteCommand) -> axum::response::Response {
    let label = command.label();
    match enqueue(state, command) {
        Ok(()) => (StatusCode::ACCEPTED, Json(QueuedBody { queued: label })).into_response(),
        Err(response) => response,
    }
}

fn enqueue(state: &WebState, command: RemoteCommand) -> Result<(), axum::response::Response> {
    match state.commands.try_send(command) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(command)) => {
            warn!("command queue full; dropping {}", command.label());
            Err(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Command queue is full",
            ))
        }
        Err(TrySendError::Closed(_)) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Control loop is not running",
        )),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
