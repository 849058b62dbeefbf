//! Localhost HTTP control surface.
//!
//! Stands in for the in-car app screens: start/end a drive, feed GPS
//! updates, toggle the voice button, and resolve interventions. Runs as a
//! background axum server on the configured port.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::activity::ActivityGate;
use crate::api::{GeoPoint, Intervention, RerouteOffer};
use crate::arbiter::{InterventionAction, InterventionArbiter};
use crate::session::{DriveState, SessionCommand, StartDriveParams};
use crate::stt::SpeechInput;
use crate::tts::SpeechOutput;
use crate::voice::VoiceCommandPipeline;

#[derive(Clone)]
pub struct ControlState {
    pub commands: mpsc::Sender<SessionCommand>,
    pub drive: Arc<DriveState>,
    pub arbiter: Arc<InterventionArbiter>,
    pub voice: Arc<VoiceCommandPipeline>,
    pub gate: ActivityGate,
    pub speech_in: Arc<SpeechInput>,
    pub speech_out: Arc<SpeechOutput>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct StartDriveBody {
    origin: String,
    destination: String,
    #[serde(default = "default_route_type")]
    selected_route_type: String,
    #[serde(default)]
    pre_drive_stress: Option<f64>,
    #[serde(default)]
    current_route_calm_score: Option<i64>,
}

fn default_route_type() -> String {
    "CALMEST".to_string()
}

#[derive(Deserialize)]
struct LocationBody {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct ActBody {
    action: String,
}

#[derive(Serialize)]
struct DriveInfo {
    id: String,
    started_at: String,
    origin: String,
    destination: String,
    selected_route_type: String,
}

#[derive(Serialize)]
struct StatusResponse {
    drive: Option<DriveInfo>,
    activity: String,
    voice_state: String,
    intervention: Option<Intervention>,
    route_offer: Option<RerouteOffer>,
    speech_input_mode: String,
    speech_output_mode: String,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    drive_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            drive_id: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            drive_id: None,
            error: Some(message.into()),
        }
    }
}

/// Build the axum router.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/drive/start", post(handle_drive_start))
        .route("/drive/end", post(handle_drive_end))
        .route("/drive/location", post(handle_location))
        .route("/voice/toggle", post(handle_voice_toggle))
        .route("/intervention/dismiss", post(handle_dismiss))
        .route("/intervention/act", post(handle_act))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_control_api(state: ControlState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ControlState>) -> Json<StatusResponse> {
    let drive = state.drive.drive().map(|d| DriveInfo {
        id: d.id,
        started_at: d.started_at,
        origin: d.origin,
        destination: d.destination,
        selected_route_type: d.selected_route_type,
    });

    Json(StatusResponse {
        drive,
        activity: state.gate.current().to_string(),
        voice_state: state.voice.state().as_str().to_string(),
        intervention: state.arbiter.current(),
        route_offer: state.drive.offer(),
        speech_input_mode: state.speech_in.mode().to_string(),
        speech_output_mode: state.speech_out.mode().to_string(),
    })
}

/// The one operation whose failure is surfaced with a retry affordance.
async fn handle_drive_start(
    State(state): State<ControlState>,
    Json(body): Json<StartDriveBody>,
) -> Json<SimpleResponse> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = SessionCommand::StartDrive {
        params: StartDriveParams {
            origin: body.origin,
            destination: body.destination,
            selected_route_type: body.selected_route_type,
            pre_drive_stress: body.pre_drive_stress,
            current_route_calm_score: body.current_route_calm_score,
        },
        reply: reply_tx,
    };

    if state.commands.send(command).await.is_err() {
        return Json(SimpleResponse::err("session loop unavailable"));
    }

    match reply_rx.await {
        Ok(Ok(drive)) => Json(SimpleResponse {
            drive_id: Some(drive.id),
            ..SimpleResponse::ok("started")
        }),
        Ok(Err(e)) => Json(SimpleResponse::err(e)),
        Err(_) => Json(SimpleResponse::err("session loop dropped the request")),
    }
}

async fn handle_drive_end(State(state): State<ControlState>) -> Json<SimpleResponse> {
    match state.commands.send(SessionCommand::EndDrive).await {
        Ok(()) => Json(SimpleResponse::ok("ending")),
        Err(_) => Json(SimpleResponse::err("session loop unavailable")),
    }
}

async fn handle_location(
    State(state): State<ControlState>,
    Json(body): Json<LocationBody>,
) -> Json<SimpleResponse> {
    let point = GeoPoint {
        lat: body.lat,
        lng: body.lng,
    };
    match state.commands.send(SessionCommand::UpdateLocation(point)).await {
        Ok(()) => Json(SimpleResponse::ok("ok")),
        Err(_) => Json(SimpleResponse::err("session loop unavailable")),
    }
}

async fn handle_voice_toggle(State(state): State<ControlState>) -> Json<SimpleResponse> {
    match state.commands.send(SessionCommand::ToggleVoice).await {
        Ok(()) => Json(SimpleResponse::ok("toggled")),
        Err(_) => Json(SimpleResponse::err("session loop unavailable")),
    }
}

async fn handle_dismiss(State(state): State<ControlState>) -> Json<SimpleResponse> {
    match state.commands.send(SessionCommand::DismissIntervention).await {
        Ok(()) => Json(SimpleResponse::ok("dismissed")),
        Err(_) => Json(SimpleResponse::err("session loop unavailable")),
    }
}

async fn handle_act(
    State(state): State<ControlState>,
    Json(body): Json<ActBody>,
) -> Json<SimpleResponse> {
    let action = match body.action.as_str() {
        "ACCEPT_REROUTE" => InterventionAction::AcceptReroute,
        "KEEP_CURRENT" => InterventionAction::KeepCurrent,
        other => return Json(SimpleResponse::err(format!("unknown action: {other}"))),
    };

    match state.commands.send(SessionCommand::Act(action)).await {
        Ok(()) => Json(SimpleResponse::ok("acting")),
        Err(_) => Json(SimpleResponse::err("session loop unavailable")),
    }
}
