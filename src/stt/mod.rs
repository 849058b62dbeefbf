//! Speech input: cloud transcription with a permanent local fallback.
//!
//! The capability starts on the cloud provider. A 503 from the cloud flips
//! it to the on-device Whisper recognizer for the rest of the session and
//! the same utterance is retried locally; any other cloud failure falls
//! back locally for that one call without downgrading.

pub mod cloud;
pub mod whisper;

use tracing::{debug, warn};

use crate::config::SpeechConfig;
use crate::provider::{CloudError, ProviderMode, ProviderSwitch};
use crate::recorder::wav_encode;
use cloud::CloudTranscriber;
use whisper::WhisperRecognizer;

pub struct SpeechInput {
    switch: ProviderSwitch,
    cloud: CloudTranscriber,
    local: Option<WhisperRecognizer>,
    sample_rate: u32,
}

impl SpeechInput {
    pub fn new(
        config: &SpeechConfig,
        local: Option<WhisperRecognizer>,
        sample_rate: u32,
    ) -> Self {
        Self {
            switch: ProviderSwitch::new("speech-input"),
            cloud: CloudTranscriber::new(config),
            local,
            sample_rate,
        }
    }

    pub fn mode(&self) -> ProviderMode {
        self.switch.mode()
    }

    /// Transcribe a captured utterance to text.
    pub async fn transcribe(&self, samples: &[f32]) -> Result<String, String> {
        if samples.is_empty() {
            return Err("empty utterance".into());
        }

        if self.switch.mode() == ProviderMode::Cloud {
            let wav = wav_encode(samples, self.sample_rate, 1)?;
            match self.cloud.transcribe(wav).await {
                Ok(text) => return Ok(text),
                Err(CloudError::NotProvisioned) => {
                    self.switch.downgrade();
                    // Retry this same utterance on the local recognizer
                }
                Err(e) => {
                    warn!("Cloud transcription failed: {e}, trying local recognizer");
                }
            }
        } else {
            debug!("Speech input on local provider");
        }

        self.transcribe_local(samples).await
    }

    async fn transcribe_local(&self, samples: &[f32]) -> Result<String, String> {
        let Some(recognizer) = self.local.clone() else {
            return Err("no local recognizer available".into());
        };

        let samples = samples.to_vec();
        tokio::task::spawn_blocking(move || recognizer.transcribe(&samples))
            .await
            .map_err(|e| format!("transcription task failed: {e}"))?
    }
}
