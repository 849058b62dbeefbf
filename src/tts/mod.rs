//! Speech output: cloud synthesis with a permanent local fallback.
//!
//! `speak` prefers the cloud voice. A 503 from the cloud flips the
//! capability to the local Kokoro engine for the rest of the session and
//! retries the same text locally; any other cloud failure falls back
//! locally for that one call without downgrading. `stop` halts whichever
//! provider is mid-playback.

pub mod cloud;
pub mod kokoro;

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, warn};

use crate::config::SpeechConfig;
use crate::provider::{CloudError, ProviderMode, ProviderSwitch};
use cloud::CloudSynthesizer;
use kokoro::KokoroEngine;

/// The arbiter's view of speech output. The production implementation is
/// [`SpeechOutput`]; tests substitute a recorder.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str);
    async fn stop(&self);
}

pub struct SpeechOutput {
    switch: ProviderSwitch,
    cloud: CloudSynthesizer,
    local: Arc<KokoroEngine>,

    // Playback of cloud audio bytes; the local engine plays its own
    output_stream: Option<OutputStream>,
    active_sink: Arc<Mutex<Option<Sink>>>,
    cancel_flag: Arc<AtomicBool>,
}

impl SpeechOutput {
    pub fn new(config: &SpeechConfig, local: Arc<KokoroEngine>) -> Self {
        let output_stream = match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("No audio output available for cloud playback: {e}");
                None
            }
        };

        Self {
            switch: ProviderSwitch::new("speech-output"),
            cloud: CloudSynthesizer::new(config),
            local,
            output_stream,
            active_sink: Arc::new(Mutex::new(None)),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mode(&self) -> ProviderMode {
        self.switch.mode()
    }

    async fn speak_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if self.switch.mode() == ProviderMode::Cloud {
            match self.cloud.synthesize(text).await {
                Ok(bytes) => {
                    self.play_bytes(bytes).await;
                    return;
                }
                Err(CloudError::NotProvisioned) => {
                    self.switch.downgrade();
                    // Retry this same text on the local engine
                }
                Err(e) => {
                    warn!("Cloud synthesis failed: {e}, trying local engine");
                }
            }
        }

        if let Err(e) = self.local.speak(text).await {
            debug!("Local TTS unavailable: {e}");
        }
    }

    /// Decode and play cloud audio, polling for completion or stop.
    async fn play_bytes(&self, bytes: Vec<u8>) {
        let Some(stream) = &self.output_stream else {
            warn!("Dropping cloud audio: no output stream");
            return;
        };

        let source = match Decoder::new(Cursor::new(bytes)) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to decode cloud audio: {e}");
                return;
            }
        };

        self.cancel_flag.store(false, Ordering::Relaxed);
        let sink = Sink::connect_new(stream.mixer());
        sink.append(source);
        *self.active_sink.lock().unwrap() = Some(sink);

        let cancel_flag = self.cancel_flag.clone();
        let active_sink = self.active_sink.clone();

        let _ = tokio::task::spawn_blocking(move || loop {
            let is_empty = {
                let guard = active_sink.lock().unwrap();
                match guard.as_ref() {
                    Some(s) => s.empty(),
                    None => true,
                }
            };

            if is_empty {
                return;
            }

            if cancel_flag.load(Ordering::Relaxed) {
                if let Some(sink) = active_sink.lock().unwrap().take() {
                    sink.stop();
                }
                return;
            }

            std::thread::sleep(std::time::Duration::from_millis(50));
        })
        .await;

        *self.active_sink.lock().unwrap() = None;
    }

    fn stop_playback(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(sink) = self.active_sink.lock().unwrap().take() {
            sink.stop();
        }
        self.local.cancel();
    }
}

#[async_trait]
impl Speaker for SpeechOutput {
    async fn speak(&self, text: &str) {
        self.speak_text(text).await;
    }

    async fn stop(&self) {
        self.stop_playback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtsConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn output_for(server: &MockServer) -> SpeechOutput {
        SpeechOutput::new(
            &SpeechConfig {
                base_url: server.uri(),
                voice: "sage".into(),
                request_timeout_secs: 5,
            },
            // Unloaded engine: the local path absorbs and drops
            Arc::new(KokoroEngine::new(&TtsConfig::default())),
        )
    }

    #[tokio::test]
    async fn provisioning_absent_downgrades_permanently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1) // downgraded mode must never hit the cloud again
            .mount(&server)
            .await;

        let output = output_for(&server);
        output.speak("Let's breathe together.").await;
        assert_eq!(output.mode(), ProviderMode::Local);

        output.speak("Still here with you.").await;
        assert_eq!(output.mode(), ProviderMode::Local);
    }

    #[tokio::test]
    async fn transient_failure_does_not_downgrade() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let output = output_for(&server);
        output.speak("You're doing great.").await;
        assert_eq!(output.mode(), ProviderMode::Cloud);
    }

    #[tokio::test]
    async fn empty_text_skips_providers() {
        let server = MockServer::start().await;
        // No mock mounted: a request would 404 and the test would still
        // pass silently, so verify by expecting zero received requests.
        let output = output_for(&server);
        output.speak("   ").await;
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_when_idle_is_safe() {
        let server = MockServer::start().await;
        let output = output_for(&server);
        output.stop().await;
        output.stop().await;
    }
}
