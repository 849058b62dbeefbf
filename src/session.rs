//! Drive session ownership and the main orchestration loop.
//!
//! One controller owns the active drive: it starts or resumes it, acquires
//! the microphone once, drives the monitor timer, routes control commands,
//! and tears everything down in order when the drive ends (speech output,
//! voice capture, microphone, timer).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::api::{DriveSession, DriveStartRequest, GeoPoint, RerouteOffer, SereneClient};
use crate::arbiter::{InterventionAction, InterventionArbiter};
use crate::config::Config;
use crate::history::{DriveEventRecord, DriveLog};
use crate::monitor::StressMonitor;
use crate::notifier::Notifier;
use crate::recorder::DriveRecorder;
use crate::tts::{Speaker, SpeechOutput};
use crate::voice::VoiceCommandPipeline;

/// Session-scoped state shared by the monitor, the voice pipeline, and the
/// control surface. Constructed at startup, cleared when a drive ends; the
/// generation counter lets in-flight work detect that its drive is gone.
pub struct DriveState {
    drive: Mutex<Option<DriveSession>>,
    route_calm_score: Mutex<Option<i64>>,
    location: Mutex<Option<GeoPoint>>,
    offer: Mutex<Option<RerouteOffer>>,
    generation: AtomicU64,
}

impl DriveState {
    pub fn new() -> Self {
        Self {
            drive: Mutex::new(None),
            route_calm_score: Mutex::new(None),
            location: Mutex::new(None),
            offer: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.drive.lock().unwrap().is_some()
    }

    pub fn drive(&self) -> Option<DriveSession> {
        self.drive.lock().unwrap().clone()
    }

    pub fn drive_id(&self) -> Option<String> {
        self.drive.lock().unwrap().as_ref().map(|d| d.id.clone())
    }

    pub fn destination(&self) -> Option<String> {
        self.drive
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.destination.clone())
    }

    pub fn set_drive(&self, drive: DriveSession, calm_score: Option<i64>) {
        *self.drive.lock().unwrap() = Some(drive);
        *self.route_calm_score.lock().unwrap() = calm_score;
    }

    /// Clear the active drive and invalidate in-flight results.
    pub fn clear_drive(&self) {
        *self.drive.lock().unwrap() = None;
        *self.route_calm_score.lock().unwrap() = None;
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn location(&self) -> Option<GeoPoint> {
        *self.location.lock().unwrap()
    }

    pub fn set_location(&self, point: GeoPoint) {
        *self.location.lock().unwrap() = Some(point);
    }

    pub fn calm_score(&self) -> Option<i64> {
        *self.route_calm_score.lock().unwrap()
    }

    pub fn offer(&self) -> Option<RerouteOffer> {
        self.offer.lock().unwrap().clone()
    }

    pub fn set_offer(&self, offer: RerouteOffer) {
        *self.offer.lock().unwrap() = Some(offer);
    }

    pub fn clear_offer(&self) {
        *self.offer.lock().unwrap() = None;
    }
}

impl Default for DriveState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for starting a drive from the control surface.
#[derive(Debug, Clone)]
pub struct StartDriveParams {
    pub origin: String,
    pub destination: String,
    pub selected_route_type: String,
    pub pre_drive_stress: Option<f64>,
    pub current_route_calm_score: Option<i64>,
}

/// Commands routed into the session loop from the control API and hotkey.
pub enum SessionCommand {
    StartDrive {
        params: StartDriveParams,
        reply: oneshot::Sender<Result<DriveSession, String>>,
    },
    EndDrive,
    ToggleVoice,
    DismissIntervention,
    Act(InterventionAction),
    UpdateLocation(GeoPoint),
}

pub struct SessionController {
    config: Config,
    client: Arc<SereneClient>,
    recorder: DriveRecorder,
    monitor: Arc<StressMonitor>,
    voice: Arc<VoiceCommandPipeline>,
    arbiter: Arc<InterventionArbiter>,
    speech_out: Arc<SpeechOutput>,
    state: Arc<DriveState>,
    notifier: Arc<Notifier>,
    log: Arc<DriveLog>,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        client: Arc<SereneClient>,
        recorder: DriveRecorder,
        monitor: Arc<StressMonitor>,
        voice: Arc<VoiceCommandPipeline>,
        arbiter: Arc<InterventionArbiter>,
        speech_out: Arc<SpeechOutput>,
        state: Arc<DriveState>,
        notifier: Arc<Notifier>,
        log: Arc<DriveLog>,
    ) -> Self {
        Self {
            config,
            client,
            recorder,
            monitor,
            voice,
            arbiter,
            speech_out,
            state,
            notifier,
            log,
        }
    }

    /// Run the session loop until the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        self.try_resume().await;

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.monitor.period_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; swallow it so a freshly
        // started drive gets a full sampling window before analysis.
        interval.tick().await;

        info!("Session loop ready");

        loop {
            tokio::select! {
                _ = interval.tick(), if self.state.is_active() => {
                    let monitor = Arc::clone(&self.monitor);
                    tokio::spawn(async move { monitor.run_cycle().await });
                }
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::StartDrive { params, reply }) => {
                            let result = self.start_drive(params).await;
                            let _ = reply.send(result);
                        }
                        Some(SessionCommand::EndDrive) => self.end_drive().await,
                        Some(SessionCommand::ToggleVoice) => Arc::clone(&self.voice).toggle(),
                        Some(SessionCommand::DismissIntervention) => self.arbiter.dismiss().await,
                        Some(SessionCommand::Act(action)) => {
                            if let Some(drive_id) = self.state.drive_id() {
                                let arbiter = Arc::clone(&self.arbiter);
                                tokio::spawn(async move {
                                    arbiter.act(&drive_id, action).await;
                                });
                            }
                        }
                        Some(SessionCommand::UpdateLocation(point)) => {
                            self.state.set_location(point);
                        }
                        None => {
                            info!("Control channel closed, shutting down");
                            self.end_drive().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Pick up an in-progress drive after a restart mid-drive.
    async fn try_resume(&mut self) {
        match self.client.active_drive().await {
            Ok(Some(drive)) => {
                info!("Resuming active drive {} ({} → {})", drive.id, drive.origin, drive.destination);
                self.begin_session(drive, None);
            }
            Ok(None) => {}
            Err(e) => warn!("Active-drive lookup failed: {e}"),
        }
    }

    /// Start a new drive. This is the one operation whose failure surfaces
    /// to the driver, with retry left to the caller.
    async fn start_drive(&mut self, params: StartDriveParams) -> Result<DriveSession, String> {
        if self.state.is_active() {
            return Err("a drive is already active".into());
        }

        let request = DriveStartRequest {
            user_id: self.client.user_id().to_string(),
            origin: params.origin,
            destination: params.destination,
            selected_route_type: params.selected_route_type,
            pre_drive_stress: params.pre_drive_stress,
            maps_url: None,
        };

        let drive = self
            .client
            .start_drive(&request)
            .await
            .map_err(|e| format!("drive start failed: {e}"))?;

        self.begin_session(drive.clone(), params.current_route_calm_score);
        Ok(drive)
    }

    fn begin_session(&mut self, drive: DriveSession, calm_score: Option<i64>) {
        self.log
            .record(DriveEventRecord::new(&drive.id, "DRIVE_STARTED").with_detail(format!(
                "{} → {}",
                drive.origin, drive.destination
            )));
        self.notifier.info(
            "Serene: drive started",
            &format!("{} → {}", drive.origin, drive.destination),
        );
        self.state.set_drive(drive, calm_score);

        // Acquire the microphone once for the whole drive. Monitoring is
        // disabled for the session when the device is unavailable; the
        // drive itself continues.
        if let Err(e) = self.recorder.acquire() {
            warn!("Microphone unavailable: {e}; stress monitoring disabled for this drive");
        }
    }

    /// End the active drive and tear down in order: speech output first,
    /// then voice capture, then the microphone, then the monitor timer.
    pub async fn end_drive(&mut self) {
        let Some(drive) = self.state.drive() else {
            return;
        };
        info!("Ending drive {}", drive.id);

        self.speech_out.stop().await;
        self.voice.stop_capture();
        self.recorder.release();
        // Bumping the generation gates the timer branch and invalidates
        // any analysis or dispatch result still in flight.
        self.state.clear_drive();
        self.arbiter.dismiss().await;
        self.state.clear_offer();

        self.log
            .record(DriveEventRecord::new(&drive.id, "DRIVE_ENDED"));
        self.notifier
            .info("Serene: drive complete", "Great job completing your drive!");

        // Best-effort backend record; teardown does not wait on it
        let client = Arc::clone(&self.client);
        let drive_id = drive.id.clone();
        tokio::spawn(async move {
            if let Err(e) = client.end_drive(&drive_id).await {
                warn!("Failed to record drive end: {e}");
            }
        });
    }
}
