//! Periodic ambient-audio stress monitoring.
//!
//! Every cycle takes whatever audio has accumulated and ships it for
//! analysis, unless the engine is busy — analysis still in flight, the
//! driver mid-command, or an intervention showing. A skipped cycle leaves
//! the chunk in the buffer and recording running, so monitoring coverage is
//! never lost; only the submission is skipped. Failures are absorbed
//! silently and the next period proceeds.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::activity::ActivityGate;
use crate::api::{InterventionType, SereneClient};
use crate::arbiter::InterventionArbiter;
use crate::history::{DriveEventRecord, DriveLog};
use crate::recorder::{wav_encode, RecorderHandle};
use crate::session::DriveState;

pub struct StressMonitor {
    client: Arc<SereneClient>,
    gate: ActivityGate,
    arbiter: Arc<InterventionArbiter>,
    recorder: RecorderHandle,
    state: Arc<DriveState>,
    log: Arc<DriveLog>,
    sample_rate: u32,
}

impl StressMonitor {
    pub fn new(
        client: Arc<SereneClient>,
        gate: ActivityGate,
        arbiter: Arc<InterventionArbiter>,
        recorder: RecorderHandle,
        state: Arc<DriveState>,
        log: Arc<DriveLog>,
        sample_rate: u32,
    ) -> Self {
        Self {
            client,
            gate,
            arbiter,
            recorder,
            state,
            log,
            sample_rate,
        }
    }

    /// One monitoring cycle. Invoked on the session timer.
    pub async fn run_cycle(&self) {
        let Some(drive_id) = self.state.drive_id() else {
            return;
        };
        let generation = self.state.generation();

        if self.arbiter.visible() {
            debug!("Cycle skipped: intervention visible");
            return;
        }
        // Claims the analysis slot; fails while a prior analysis or a voice
        // command is running. The chunk stays in the buffer either way.
        let Some(permit) = self.gate.begin_analysis() else {
            debug!("Cycle skipped: {} in progress", self.gate.current());
            return;
        };

        let chunk = self.recorder.take_chunk();
        if chunk.is_empty() {
            return;
        }
        debug!(
            "Submitting {:.1}s chunk for analysis",
            chunk.len() as f64 / self.sample_rate as f64
        );

        let wav = match wav_encode(&chunk, self.sample_rate, 1) {
            Ok(wav) => wav,
            Err(e) => {
                warn!("Failed to encode chunk: {e}");
                return;
            }
        };

        let reading = match self.client.analyze_audio(wav, &drive_id).await {
            Ok(reading) => reading,
            Err(e) => {
                // Abandoned silently; no retry within this period
                warn!("Stress analysis failed: {e}");
                return;
            }
        };

        if self.state.generation() != generation {
            debug!("Discarding stress reading: drive ended");
            return;
        }

        self.log.record(
            DriveEventRecord::new(&drive_id, "STRESS_READING")
                .with_stress(reading.stress_score, &format!("{:?}", reading.stress_level).to_uppercase()),
        );

        if !reading.trigger_intervention {
            return;
        }

        let intervention = match self
            .client
            .decide_intervention(
                &drive_id,
                reading.stress_score,
                reading.stress_level,
                self.state.location(),
                self.state.destination().as_deref(),
                self.state.calm_score(),
            )
            .await
        {
            Ok(intervention) => intervention,
            Err(e) => {
                warn!("Intervention decision failed: {e}");
                return;
            }
        };

        if self.state.generation() != generation {
            debug!("Discarding intervention: drive ended");
            return;
        }
        if intervention.intervention_type == InterventionType::None {
            return;
        }

        // Analysis is done; visibility is the arbiter's own slot.
        drop(permit);
        self.arbiter.submit(&drive_id, intervention).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InterventionType;
    use crate::testutil::{active_state, arbiter_with, recorder_handle, serene_client, RecordingSpeaker};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn monitor_with(
        server: &MockServer,
        speaker: Arc<RecordingSpeaker>,
        state: Arc<DriveState>,
        recorder: RecorderHandle,
        gate: ActivityGate,
    ) -> (StressMonitor, Arc<InterventionArbiter>) {
        let arbiter = Arc::new(arbiter_with(speaker, server));
        let monitor = StressMonitor::new(
            serene_client(server),
            gate,
            Arc::clone(&arbiter),
            recorder,
            state,
            Arc::new(DriveLog::disabled()),
            16000,
        );
        (monitor, arbiter)
    }

    fn mock_reading(score: f64, level: &str, trigger: bool) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "stress_score": score,
            "stress_level": level,
            "trigger_intervention": trigger,
        }))
    }

    #[tokio::test]
    async fn critical_reading_surfaces_pull_over_spoken_once() {
        // Scenario: a critical reading arrives while nothing is busy
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emotion/audio"))
            .respond_with(mock_reading(0.85, "CRITICAL", true))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/intervention/decide"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "intervention_type": "PULL_OVER",
                "stress_level": "CRITICAL",
                "stress_score": 0.85,
                "message": "Your safety is the priority. Let's find a safe place to pull over.",
                "pull_over_guidance": ["Signal and move to the right lane"],
            })))
            .mount(&server)
            .await;

        let speaker = RecordingSpeaker::new();
        let recorder = recorder_handle();
        recorder.ingest(&[0.1; 16000]);
        let (monitor, arbiter) = monitor_with(
            &server,
            speaker.clone(),
            active_state(),
            recorder,
            ActivityGate::new(),
        )
        .await;

        monitor.run_cycle().await;

        let visible = arbiter.current().expect("intervention should be visible");
        assert_eq!(visible.intervention_type, InterventionType::PullOver);
        assert_eq!(speaker.spoken.lock().unwrap().len(), 1);
        // The analysis slot was released
        assert!(monitor.gate.is_idle());
    }

    #[tokio::test]
    async fn cycle_skipped_while_intervention_visible() {
        // Scenario: the timer fires while an intervention is showing
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emotion/audio"))
            .respond_with(mock_reading(0.2, "LOW", false))
            .expect(0) // no analysis call may be made
            .mount(&server)
            .await;

        let speaker = RecordingSpeaker::new();
        let recorder = recorder_handle();
        recorder.ingest(&[0.1; 8000]);
        let state = active_state();
        let (monitor, arbiter) = monitor_with(
            &server,
            speaker.clone(),
            state,
            recorder.clone(),
            ActivityGate::new(),
        )
        .await;

        arbiter
            .submit("drive-1", crate::testutil::intervention(InterventionType::Breathing, "Breathe."))
            .await;

        monitor.run_cycle().await;

        // Chunk retained, recording untouched, intervention unchanged
        assert_eq!(recorder.buffered_samples(), 8000);
        assert!(recorder.is_recording());
        assert_eq!(
            arbiter.current().unwrap().intervention_type,
            InterventionType::Breathing
        );
    }

    #[tokio::test]
    async fn cycle_skipped_while_voice_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emotion/audio"))
            .respond_with(mock_reading(0.2, "LOW", false))
            .expect(0)
            .mount(&server)
            .await;

        let speaker = RecordingSpeaker::new();
        let recorder = recorder_handle();
        recorder.ingest(&[0.1; 8000]);
        let gate = ActivityGate::new();
        let _voice = gate.begin_voice().unwrap();

        let (monitor, _arbiter) =
            monitor_with(&server, speaker, active_state(), recorder.clone(), gate.clone()).await;
        monitor.run_cycle().await;

        assert_eq!(recorder.buffered_samples(), 8000);
    }

    #[tokio::test]
    async fn empty_chunk_submits_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emotion/audio"))
            .respond_with(mock_reading(0.2, "LOW", false))
            .expect(0)
            .mount(&server)
            .await;

        let speaker = RecordingSpeaker::new();
        let (monitor, _) = monitor_with(
            &server,
            speaker,
            active_state(),
            recorder_handle(),
            ActivityGate::new(),
        )
        .await;
        monitor.run_cycle().await;
        assert!(monitor.gate.is_idle());
    }

    #[tokio::test]
    async fn analysis_failure_is_absorbed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emotion/audio"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let speaker = RecordingSpeaker::new();
        let recorder = recorder_handle();
        recorder.ingest(&[0.1; 8000]);
        let (monitor, arbiter) = monitor_with(
            &server,
            speaker.clone(),
            active_state(),
            recorder,
            ActivityGate::new(),
        )
        .await;

        monitor.run_cycle().await;

        assert!(!arbiter.visible());
        assert!(speaker.spoken.lock().unwrap().is_empty());
        // Slot released so the next period proceeds normally
        assert!(monitor.gate.is_idle());
    }

    #[tokio::test]
    async fn low_reading_makes_no_decision_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emotion/audio"))
            .respond_with(mock_reading(0.15, "LOW", false))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/intervention/decide"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let speaker = RecordingSpeaker::new();
        let recorder = recorder_handle();
        recorder.ingest(&[0.1; 8000]);
        let (monitor, arbiter) = monitor_with(
            &server,
            speaker,
            active_state(),
            recorder,
            ActivityGate::new(),
        )
        .await;

        monitor.run_cycle().await;
        assert!(!arbiter.visible());
    }

    #[tokio::test]
    async fn no_active_drive_is_a_noop() {
        let server = MockServer::start().await;
        let speaker = RecordingSpeaker::new();
        let (monitor, _) = monitor_with(
            &server,
            speaker,
            Arc::new(DriveState::new()),
            recorder_handle(),
            ActivityGate::new(),
        )
        .await;
        monitor.run_cycle().await;
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
