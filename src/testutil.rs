//! Shared test fixtures: recording stand-ins for the speech and navigation
//! seams, plus builders wired to a wiremock backend.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wiremock::MockServer;

use crate::api::{
    DriveSession, DriveStatus, Intervention, InterventionType, RerouteOffer, SereneClient,
    StressLevel,
};
use crate::arbiter::InterventionArbiter;
use crate::config::{AudioConfig, BackendConfig, SpeechConfig};
use crate::history::DriveLog;
use crate::notifier::Notifier;
use crate::recorder::{DriveRecorder, RecorderHandle};
use crate::reroute::{Navigator, RerouteCoordinator};
use crate::session::DriveState;
use crate::stt::SpeechInput;
use crate::tts::Speaker;

/// Records speak/stop calls instead of producing audio.
pub struct RecordingSpeaker {
    pub spoken: Mutex<Vec<String>>,
    pub stops: Mutex<u32>,
}

impl RecordingSpeaker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            stops: Mutex::new(0),
        })
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }

    async fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }
}

pub struct NullNavigator;

impl Navigator for NullNavigator {
    fn open(&self, _url: &str) {}
}

pub fn serene_client(server: &MockServer) -> Arc<SereneClient> {
    Arc::new(SereneClient::new(&BackendConfig {
        base_url: server.uri(),
        user_id: "driver-1".into(),
        request_timeout_secs: 5,
    }))
}

pub fn speech_input(server: &MockServer) -> Arc<SpeechInput> {
    Arc::new(SpeechInput::new(
        &SpeechConfig {
            base_url: server.uri(),
            voice: "sage".into(),
            request_timeout_secs: 5,
        },
        None,
        16000,
    ))
}

pub fn arbiter_with(speaker: Arc<RecordingSpeaker>, server: &MockServer) -> InterventionArbiter {
    let log = Arc::new(DriveLog::disabled());
    let reroute = Arc::new(RerouteCoordinator::with_navigator(
        serene_client(server),
        Arc::clone(&log),
        Box::new(NullNavigator),
    ));
    InterventionArbiter::new(speaker, Arc::new(Notifier::new(false)), reroute, log)
}

/// A recorder handle with recording switched on, no audio hardware needed.
pub fn recorder_handle() -> RecorderHandle {
    let recorder = DriveRecorder::new(AudioConfig::default());
    let handle = recorder.handle();
    handle.force_recording(true);
    handle
}

pub fn test_drive() -> DriveSession {
    DriveSession {
        id: "drive-1".into(),
        user_id: "driver-1".into(),
        started_at: "2025-06-01T08:30:00Z".into(),
        origin: "Home".into(),
        destination: "Work".into(),
        selected_route_type: "CALMEST".into(),
        status: DriveStatus::Active,
    }
}

/// Drive state with an active drive and a known calm score.
pub fn active_state() -> Arc<DriveState> {
    let state = Arc::new(DriveState::new());
    state.set_drive(test_drive(), Some(55));
    state
}

pub fn intervention(kind: InterventionType, message: &str) -> Intervention {
    Intervention {
        intervention_type: kind,
        stress_level: StressLevel::High,
        stress_score: 0.7,
        message: message.to_string(),
        breathing_content: None,
        grounding_content: None,
        pull_over_guidance: None,
        reroute: None,
    }
}

pub fn reroute_offer() -> RerouteOffer {
    RerouteOffer {
        name: "Riverside Ave".into(),
        calm_score: 82,
        duration_minutes: Some(24),
        distance_km: Some(12.5),
        extra_time_minutes: 6,
        calm_score_improvement: 27,
        maps_url: "https://maps.example/riverside".into(),
    }
}
