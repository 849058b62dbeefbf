//! Cloud transcription client.
//!
//! Uploads a WAV utterance to the provider's `/transcribe` endpoint. A 503
//! reply means the provider is not provisioned for this deployment; the
//! caller downgrades the capability permanently on that signal.

use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::SpeechConfig;
use crate::provider::CloudError;

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

pub struct CloudTranscriber {
    client: Client,
    base_url: String,
}

impl CloudTranscriber {
    pub fn new(config: &SpeechConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn transcribe(&self, wav_bytes: Vec<u8>) -> Result<String, CloudError> {
        let url = format!("{}/transcribe", self.base_url);

        let part = multipart::Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new().part("file", part);

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(CloudError::from_status(resp.status()));
        }

        let body: TranscribeResponse = resp.json().await?;
        debug!("Cloud transcription: \"{}\"", body.text);
        Ok(body.text)
    }
}
