//! Serene backend client: stress analysis, intervention decisions, voice
//! commands, and the drive lifecycle.
//!
//! All endpoints are JSON over HTTP except the audio upload, which goes up
//! as a multipart WAV. Callers decide what a failure means; this module
//! only distinguishes transport problems from non-success statuses.

use reqwest::multipart;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::BackendConfig;

// --- Wire types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StressLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterventionType {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "CALMING_MESSAGE")]
    Calming,
    #[serde(rename = "BREATHING_EXERCISE")]
    Breathing,
    #[serde(rename = "GROUNDING_EXERCISE")]
    Grounding,
    #[serde(rename = "PULL_OVER")]
    PullOver,
}

/// Output of one ambient-audio analysis call.
#[derive(Debug, Clone, Deserialize)]
pub struct StressReading {
    pub stress_score: f64,
    pub stress_level: StressLevel,
    pub trigger_intervention: bool,
    #[serde(default)]
    pub intervention_type: Option<InterventionType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreathingContent {
    pub name: String,
    #[serde(default)]
    pub duration_seconds: u32,
    pub instructions: Vec<String>,
    #[serde(default)]
    pub audio_script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingContent {
    pub name: String,
    pub instructions: Vec<String>,
    #[serde(default)]
    pub audio_script: Option<String>,
}

/// A calming action to surface to the driver. At most one of these is ever
/// visible; the arbiter owns that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub intervention_type: InterventionType,
    pub stress_level: StressLevel,
    pub stress_score: f64,
    pub message: String,
    #[serde(default)]
    pub breathing_content: Option<BreathingContent>,
    #[serde(default)]
    pub grounding_content: Option<GroundingContent>,
    #[serde(default)]
    pub pull_over_guidance: Option<Vec<String>>,
    #[serde(default)]
    pub reroute: Option<RerouteResult>,
}

/// A suggested calmer route, as produced by the reroute agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerouteOffer {
    pub name: String,
    pub calm_score: i64,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    pub extra_time_minutes: i64,
    pub calm_score_improvement: i64,
    pub maps_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRoute {
    pub calm_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerouteResult {
    pub reroute_available: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub current_route: Option<CurrentRoute>,
    #[serde(default)]
    pub suggested_route: Option<RerouteOffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoiceAction {
    #[serde(rename = "TRIGGER_INTERVENTION")]
    TriggerIntervention,
    #[serde(rename = "FIND_ROUTE")]
    FindRoute,
    #[serde(rename = "FIND_SAFE_SPOT")]
    FindSafeSpot,
    #[serde(rename = "PROVIDE_ETA")]
    ProvideEta,
    #[serde(rename = "START_DEBRIEF")]
    StartDebrief,
    #[serde(rename = "NONE")]
    None,
}

// Actions this build doesn't know map to None, so a newer backend never
// breaks dispatch.
impl<'de> Deserialize<'de> for VoiceAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "TRIGGER_INTERVENTION" => Self::TriggerIntervention,
            "FIND_ROUTE" => Self::FindRoute,
            "FIND_SAFE_SPOT" => Self::FindSafeSpot,
            "PROVIDE_ETA" => Self::ProvideEta,
            "START_DEBRIEF" => Self::StartDebrief,
            _ => Self::None,
        })
    }
}

/// Server-side classification of one transcribed utterance.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceCommandResult {
    pub understood: bool,
    #[serde(default)]
    pub command_type: Option<String>,
    pub action: VoiceAction,
    #[serde(default)]
    pub speech_response: Option<String>,
    #[serde(default)]
    pub intervention: Option<Intervention>,
    #[serde(default)]
    pub reroute: Option<RerouteResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    Active,
    Ended,
}

/// The one active drive this service is monitoring.
#[derive(Debug, Clone)]
pub struct DriveSession {
    pub id: String,
    pub user_id: String,
    pub started_at: String,
    pub origin: String,
    pub destination: String,
    pub selected_route_type: String,
    pub status: DriveStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveStartRequest {
    pub user_id: String,
    pub origin: String,
    pub destination: String,
    pub selected_route_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_drive_stress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DriveStartResponse {
    id: String,
    user_id: String,
    started_at: String,
    origin: String,
    destination: String,
    selected_route_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ActiveDriveResponse {
    id: String,
    started_at: String,
    origin: String,
    destination: String,
    selected_route_type: String,
}

// --- Errors ---

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("malformed response from {endpoint}")]
    Malformed { endpoint: &'static str },
}

impl ApiError {
    fn check(endpoint: &'static str, resp: &reqwest::Response) -> Result<(), ApiError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            })
        }
    }
}

// --- Client ---

pub struct SereneClient {
    client: Client,
    base_url: String,
    user_id: String,
}

impl SereneClient {
    pub fn new(config: &BackendConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Start a new drive on the backend.
    pub async fn start_drive(&self, request: &DriveStartRequest) -> Result<DriveSession, ApiError> {
        let url = format!("{}/api/drives/start", self.base_url);
        let resp = self.client.post(&url).json(request).send().await?;
        ApiError::check("drives/start", &resp)?;

        let body: DriveStartResponse = resp.json().await?;
        info!("Drive {} started ({} → {})", body.id, body.origin, body.destination);

        Ok(DriveSession {
            id: body.id,
            user_id: body.user_id,
            started_at: body.started_at,
            origin: body.origin,
            destination: body.destination,
            selected_route_type: body.selected_route_type,
            status: DriveStatus::Active,
        })
    }

    /// Look up an in-progress drive for this user, if any. Used to resume
    /// monitoring when the service restarts mid-drive.
    pub async fn active_drive(&self) -> Result<Option<DriveSession>, ApiError> {
        let url = format!("{}/api/users/{}/active-drive", self.base_url, self.user_id);
        let resp = self.client.get(&url).send().await?;
        ApiError::check("active-drive", &resp)?;

        // The endpoint answers either {"active_drive": null} or the drive
        // fields directly.
        let body: serde_json::Value = resp.json().await?;
        if body.get("id").is_none() {
            return Ok(None);
        }
        let drive: ActiveDriveResponse = serde_json::from_value(body)
            .map_err(|_| ApiError::Malformed {
                endpoint: "active-drive",
            })?;

        Ok(Some(DriveSession {
            id: drive.id,
            user_id: self.user_id.clone(),
            started_at: drive.started_at,
            origin: drive.origin,
            destination: drive.destination,
            selected_route_type: drive.selected_route_type,
            status: DriveStatus::Active,
        }))
    }

    /// Record the end of a drive. Best-effort: the caller tears the session
    /// down locally no matter what this returns.
    pub async fn end_drive(&self, drive_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/api/drives/{drive_id}/end", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "user_id": self.user_id }))
            .send()
            .await?;
        ApiError::check("drives/end", &resp)?;
        Ok(())
    }

    /// Ship one ambient-audio chunk for stress analysis.
    pub async fn analyze_audio(
        &self,
        wav_bytes: Vec<u8>,
        drive_id: &str,
    ) -> Result<StressReading, ApiError> {
        let url = format!("{}/api/emotion/audio", self.base_url);

        let part = multipart::Part::bytes(wav_bytes)
            .file_name("chunk.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("drive_id", drive_id.to_string());

        let resp = self.client.post(&url).multipart(form).send().await?;
        ApiError::check("emotion/audio", &resp)?;

        let reading: StressReading = resp.json().await?;
        debug!(
            "Stress reading: score={:.2} level={:?} trigger={}",
            reading.stress_score, reading.stress_level, reading.trigger_intervention
        );
        Ok(reading)
    }

    /// Ask the backend which intervention fits the current stress reading.
    #[allow(clippy::too_many_arguments)]
    pub async fn decide_intervention(
        &self,
        drive_id: &str,
        stress_score: f64,
        stress_level: StressLevel,
        current_location: Option<GeoPoint>,
        destination: Option<&str>,
        current_route_calm_score: Option<i64>,
    ) -> Result<Intervention, ApiError> {
        let url = format!("{}/api/intervention/decide", self.base_url);
        let body = serde_json::json!({
            "user_id": self.user_id,
            "drive_id": drive_id,
            "stress_score": stress_score,
            "stress_level": stress_level,
            "context": "DURING_DRIVE",
            "current_location": current_location,
            "destination": destination,
            "current_route_calm_score": current_route_calm_score,
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        ApiError::check("intervention/decide", &resp)?;
        Ok(resp.json().await?)
    }

    /// Classify a transcribed utterance and get the action to dispatch.
    pub async fn voice_command(
        &self,
        drive_id: &str,
        transcribed_text: &str,
        current_location: Option<GeoPoint>,
        destination: Option<&str>,
        current_route_calm_score: Option<i64>,
    ) -> Result<VoiceCommandResult, ApiError> {
        let url = format!("{}/api/voice/command", self.base_url);
        let body = serde_json::json!({
            "user_id": self.user_id,
            "drive_id": drive_id,
            "transcribed_text": transcribed_text,
            "context": "DURING_DRIVE",
            "current_location": current_location,
            "destination": destination,
            "current_route_calm_score": current_route_calm_score,
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        ApiError::check("voice/command", &resp)?;
        Ok(resp.json().await?)
    }

    /// Record that the driver accepted a reroute suggestion.
    pub async fn accept_reroute(
        &self,
        drive_id: &str,
        route_name: &str,
        calm_score_improvement: Option<i64>,
    ) -> Result<(), ApiError> {
        let url = format!("{}/api/drives/{drive_id}/accept-reroute", self.base_url);
        let body = serde_json::json!({
            "user_id": self.user_id,
            "route_name": route_name,
            "calm_score_improvement": calm_score_improvement,
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        ApiError::check("accept-reroute", &resp)?;
        Ok(())
    }
}
