//! Cloud synthesis client.
//!
//! Posts text to the provider's `/synthesize` endpoint and returns the raw
//! audio bytes. A 503 reply is the not-provisioned signal that downgrades
//! the speech-output capability for the session.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::SpeechConfig;
use crate::provider::CloudError;

pub struct CloudSynthesizer {
    client: Client,
    base_url: String,
    voice: String,
}

impl CloudSynthesizer {
    pub fn new(config: &SpeechConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voice: config.voice.clone(),
        }
    }

    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CloudError> {
        let url = format!("{}/synthesize", self.base_url);
        let body = serde_json::json!({ "text": text, "voice": self.voice });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(CloudError::from_status(resp.status()));
        }

        let bytes = resp.bytes().await?.to_vec();
        debug!("Cloud synthesis: {} chars → {} bytes", text.len(), bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn synthesizer_for(server: &MockServer) -> CloudSynthesizer {
        CloudSynthesizer::new(&SpeechConfig {
            base_url: server.uri(),
            voice: "sage".into(),
            request_timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn returns_audio_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .mount(&server)
            .await;

        let bytes = synthesizer_for(&server).synthesize("hello").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn maps_503_to_not_provisioned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = synthesizer_for(&server).synthesize("hello").await.unwrap_err();
        assert!(matches!(err, CloudError::NotProvisioned));
    }
}
