//! Voice command pipeline.
//!
//! IDLE → LISTENING → TRANSCRIBING → DISPATCHING → IDLE
//!
//! A toggle starts capture; the next toggle stops it and processes the
//! utterance. Only one command is ever in flight: entering LISTENING claims
//! the voice slot, which the stress monitor respects, and the slot is
//! released when the processing task finishes on any path. Failures return
//! the pipeline to IDLE silently.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::{ActivityGate, ActivityPermit};
use crate::api::{
    Intervention, InterventionType, SereneClient, StressLevel, VoiceAction, VoiceCommandResult,
};
use crate::arbiter::InterventionArbiter;
use crate::history::{DriveEventRecord, DriveLog};
use crate::notifier::Notifier;
use crate::recorder::RecorderHandle;
use crate::session::{DriveState, SessionCommand};
use crate::stt::SpeechInput;
use crate::tts::Speaker;

/// Fixed pull-over script used when the backend returns FIND_SAFE_SPOT
/// without an intervention payload.
const PULL_OVER_SCRIPT: &str = "Let's find a safe place to stop. Signal right and look for a \
     parking lot or wide shoulder. Turn on your hazards when you stop. I'm here with you.";

const PULL_OVER_STEPS: [&str; 4] = [
    "Signal and move to the right lane",
    "Look for a safe spot - parking lot, rest area, or wide shoulder",
    "Turn on your hazard lights",
    "Put the car in park and take your time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
    Transcribing,
    Dispatching,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Listening => "LISTENING",
            Self::Transcribing => "TRANSCRIBING",
            Self::Dispatching => "DISPATCHING",
        }
    }
}

struct PipelineInner {
    state: VoiceState,
    // Held from LISTENING entry until the processing task completes
    permit: Option<ActivityPermit>,
    // Distinguishes captures so a stale watchdog never stops a newer one
    capture_seq: u64,
}

pub struct VoiceCommandPipeline {
    inner: Mutex<PipelineInner>,
    recorder: RecorderHandle,
    speech_in: Arc<SpeechInput>,
    speaker: Arc<dyn Speaker>,
    client: Arc<SereneClient>,
    arbiter: Arc<InterventionArbiter>,
    gate: ActivityGate,
    state: Arc<DriveState>,
    notifier: Arc<Notifier>,
    log: Arc<DriveLog>,
    session_tx: mpsc::Sender<SessionCommand>,
    max_utterance: std::time::Duration,
}

impl VoiceCommandPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recorder: RecorderHandle,
        speech_in: Arc<SpeechInput>,
        speaker: Arc<dyn Speaker>,
        client: Arc<SereneClient>,
        arbiter: Arc<InterventionArbiter>,
        gate: ActivityGate,
        state: Arc<DriveState>,
        notifier: Arc<Notifier>,
        log: Arc<DriveLog>,
        session_tx: mpsc::Sender<SessionCommand>,
        max_utterance: std::time::Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(PipelineInner {
                state: VoiceState::Idle,
                permit: None,
                capture_seq: 0,
            }),
            recorder,
            speech_in,
            speaker,
            client,
            arbiter,
            gate,
            state,
            notifier,
            log,
            session_tx,
            max_utterance,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.inner.lock().unwrap().state
    }

    /// The driver's voice button. Idle starts capture; listening stops it
    /// and processes. Toggles while a command is already being processed
    /// are dropped.
    pub fn toggle(self: Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            VoiceState::Idle => {
                if !self.state.is_active() {
                    debug!("Voice toggle ignored: no active drive");
                    return;
                }
                if self.arbiter.visible() {
                    debug!("Voice toggle ignored: intervention visible");
                    return;
                }
                if !self.recorder.is_recording() {
                    debug!("Voice toggle ignored: microphone unavailable");
                    return;
                }
                let Some(permit) = self.gate.begin_voice() else {
                    debug!("Voice toggle ignored: {} in progress", self.gate.current());
                    return;
                };

                self.recorder.begin_utterance();
                inner.state = VoiceState::Listening;
                inner.permit = Some(permit);
                inner.capture_seq += 1;
                info!("Voice: IDLE → LISTENING");

                // Force-stop runaway captures (driver forgot to toggle off)
                let seq = inner.capture_seq;
                let pipeline = Arc::clone(&self);
                let cap = self.max_utterance;
                tokio::spawn(async move {
                    tokio::time::sleep(cap).await;
                    let still_listening = {
                        let inner = pipeline.inner.lock().unwrap();
                        inner.state == VoiceState::Listening && inner.capture_seq == seq
                    };
                    if still_listening {
                        debug!("Utterance hit the {:.0}s cap, processing", cap.as_secs_f64());
                        pipeline.clone().toggle();
                    }
                });
            }
            VoiceState::Listening => {
                let samples = self.recorder.end_utterance();
                let permit = inner.permit.take();
                inner.state = VoiceState::Transcribing;
                info!("Voice: LISTENING → TRANSCRIBING ({} samples)", samples.len());

                let pipeline = Arc::clone(&self);
                tokio::spawn(async move {
                    pipeline.process(samples, permit).await;
                });
            }
            VoiceState::Transcribing | VoiceState::Dispatching => {
                debug!("Voice toggle ignored: command already in flight");
            }
        }
    }

    /// Abort any capture in progress and return to idle. Used at drive end.
    pub fn stop_capture(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == VoiceState::Listening {
            let _ = self.recorder.end_utterance();
            info!("Voice capture stopped");
        }
        // Dropping the permit releases the voice slot
        inner.permit = None;
        inner.state = VoiceState::Idle;
    }

    async fn process(self: Arc<Self>, samples: Vec<f32>, permit: Option<ActivityPermit>) {
        // The slot is released when this task ends, error or not
        let _permit = permit;

        if let Err(e) = self.process_inner(samples).await {
            debug!("Voice command abandoned: {e}");
        }
        self.set_state(VoiceState::Idle);
    }

    async fn process_inner(&self, samples: Vec<f32>) -> Result<(), String> {
        let drive_id = self.state.drive_id().ok_or("no active drive")?;
        let generation = self.state.generation();

        if samples.is_empty() {
            return Err("empty utterance".into());
        }

        let transcript = self.speech_in.transcribe(&samples).await?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err("empty transcript".into());
        }
        if self.state.generation() != generation {
            return Err("drive ended mid-command".into());
        }

        self.set_state(VoiceState::Dispatching);
        info!("Voice: TRANSCRIBING → DISPATCHING (\"{transcript}\")");

        let result = self
            .client
            .voice_command(
                &drive_id,
                transcript,
                self.state.location(),
                self.state.destination().as_deref(),
                self.state.calm_score(),
            )
            .await
            .map_err(|e| e.to_string())?;

        if self.state.generation() != generation {
            return Err("drive ended mid-command".into());
        }

        self.log.record(
            DriveEventRecord::new(&drive_id, "VOICE_COMMAND")
                .with_detail(format!("{:?}", result.action)),
        );
        self.dispatch(&drive_id, result).await;
        Ok(())
    }

    async fn dispatch(&self, drive_id: &str, result: VoiceCommandResult) {
        match result.action {
            VoiceAction::TriggerIntervention => {
                if let Some(intervention) = result.intervention {
                    // The intervention's own message is spoken by the
                    // arbiter; the speech response is suppressed
                    self.arbiter.submit(drive_id, intervention).await;
                } else {
                    self.speak_response(&result.speech_response).await;
                }
            }
            VoiceAction::FindSafeSpot => {
                let intervention = result.intervention.unwrap_or_else(pull_over_fallback);
                self.arbiter.submit(drive_id, intervention).await;
            }
            VoiceAction::FindRoute => {
                match result.reroute.and_then(|r| r.suggested_route) {
                    Some(offer) => {
                        // Standalone offer: shown alongside normal driving
                        // UI, not wrapped in an intervention
                        info!(
                            "Route suggestion: {} (+{} calm)",
                            offer.name, offer.calm_score_improvement
                        );
                        self.notifier.reroute_offer(&offer);
                        self.log.record(
                            DriveEventRecord::new(drive_id, "REROUTE_OFFERED")
                                .with_detail(offer.name.clone()),
                        );
                        self.state.set_offer(offer);
                    }
                    None => debug!("FIND_ROUTE without a suggested route"),
                }
                self.speak_response(&result.speech_response).await;
            }
            VoiceAction::StartDebrief => {
                self.speak_response(&result.speech_response).await;
                if self.session_tx.send(SessionCommand::EndDrive).await.is_err() {
                    warn!("Session loop gone; cannot end drive");
                }
            }
            VoiceAction::ProvideEta | VoiceAction::None => {
                self.speak_response(&result.speech_response).await;
            }
        }
    }

    async fn speak_response(&self, response: &Option<String>) {
        if let Some(text) = response {
            self.speaker.speak(text).await;
        }
    }

    fn set_state(&self, state: VoiceState) {
        self.inner.lock().unwrap().state = state;
    }
}

/// Critical pull-over intervention used when the payload is missing.
fn pull_over_fallback() -> Intervention {
    Intervention {
        intervention_type: InterventionType::PullOver,
        stress_level: StressLevel::Critical,
        stress_score: 0.85,
        message: PULL_OVER_SCRIPT.to_string(),
        breathing_content: None,
        grounding_content: None,
        pull_over_guidance: Some(PULL_OVER_STEPS.iter().map(|s| s.to_string()).collect()),
        reroute: None,
    }
}
