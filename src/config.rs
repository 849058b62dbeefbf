//! Configuration management for serene-drive-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! sensible defaults so the service starts with no config file at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub device_index: Option<u32>,
    pub channels: u16,
    pub chunk_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            device_index: None,
            channels: 1,
            chunk_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between stress-analysis submissions.
    pub period_secs: u64,
    /// Longest utterance the voice pipeline will capture before force-stop.
    pub max_utterance_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period_secs: 30,
            max_utterance_secs: 15.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub combo: Vec<String>,
    pub alt_combos: Vec<Vec<String>>,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            combo: vec!["KEY_LEFTMETA".into(), "KEY_SPACE".into()],
            alt_combos: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the Serene backend.
    pub base_url: String,
    /// User whose drives this service runs.
    pub user_id: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            user_id: String::new(),
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Base URL of the cloud speech provider (transcribe + synthesize).
    pub base_url: String,
    /// Cloud voice name passed to the synthesize endpoint.
    pub voice: String,
    pub request_timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/speech".into(),
            voice: "sage".into(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub model: String,
    pub device: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "distil-whisper/distil-large-v3".into(),
            device: "cuda".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub voice: String,
    pub speed: f32,
    pub model_path: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: "af_heart".into(),
            speed: 1.0,
            model_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub monitor: MonitorConfig,
    pub hotkey: HotkeyConfig,
    pub backend: BackendConfig,
    pub speech: SpeechConfig,
    pub whisper: WhisperConfig,
    pub tts: TtsConfig,
    pub feedback: FeedbackConfig,
    pub control: ControlConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/serene-drive/config.yaml
    /// 3. /etc/serene-drive/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/serene-drive/config.yaml")),
                Some(PathBuf::from("/etc/serene-drive/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.monitor.period_secs, 30);
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert!(config.control.enabled);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "monitor:\n  period_secs: 10\nbackend:\n  user_id: driver-1\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.monitor.period_secs, 10);
        assert_eq!(config.backend.user_id, "driver-1");
        // Untouched sections keep their defaults
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.tts.voice, "af_heart");
    }
}
