//! Drive audio capture with cpal.
//!
//! One input stream is opened when the drive starts and stays open until it
//! ends. The stress monitor periodically takes whatever has accumulated
//! (recording continues uninterrupted across the swap), and the voice
//! pipeline carves utterances out of the same stream, so the microphone is
//! acquired exactly once per drive.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::AudioConfig;

/// Cap on buffered audio when analysis is starved for a long stretch;
/// oldest samples are dropped first so the most recent window survives.
const MAX_BUFFER_SECS: usize = 120;

struct RecorderInner {
    recording: bool,
    buffer: Vec<f32>,
    utterance_start: Option<usize>,
    max_samples: usize,
}

struct RecorderShared {
    inner: Mutex<RecorderInner>,
}

/// Owns the cpal stream. Lives in the session task (cpal streams are not
/// `Send`); everything else talks to the shared buffer through a handle.
pub struct DriveRecorder {
    config: AudioConfig,
    shared: Arc<RecorderShared>,
    stream: Option<Stream>,
}

impl DriveRecorder {
    pub fn new(config: AudioConfig) -> Self {
        let max_samples = MAX_BUFFER_SECS * config.sample_rate as usize;
        let shared = Arc::new(RecorderShared {
            inner: Mutex::new(RecorderInner {
                recording: false,
                buffer: Vec::with_capacity(config.sample_rate as usize * 32),
                utterance_start: None,
                max_samples,
            }),
        });

        Self {
            config,
            shared,
            stream: None,
        }
    }

    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Open the microphone and start recording. No-op if already open.
    pub fn acquire(&mut self) -> Result<(), String> {
        if self.stream.is_some() {
            self.shared.set_recording(true);
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or("No input audio device available")?;

        info!(
            "Using audio device: {}",
            device.name().unwrap_or("unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let shared = Arc::clone(&self.shared);
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    shared.push(data);
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None, // timeout
            )
            .map_err(|e| format!("Failed to build input stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start audio stream: {e}"))?;

        self.shared.set_recording(true);
        self.stream = Some(stream);
        info!("Microphone acquired, recording started");
        Ok(())
    }

    /// Stop recording and release the microphone. Idempotent.
    pub fn release(&mut self) {
        self.shared.set_recording(false);
        if self.stream.take().is_some() {
            info!("Microphone released");
        }
        let mut inner = self.shared.inner.lock().unwrap();
        inner.buffer.clear();
        inner.utterance_start = None;
    }

    #[allow(dead_code)]
    pub fn is_recording(&self) -> bool {
        self.shared.inner.lock().unwrap().recording
    }
}

impl RecorderShared {
    fn set_recording(&self, on: bool) {
        self.inner.lock().unwrap().recording = on;
    }

    fn push(&self, data: &[f32]) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.recording {
            return;
        }
        inner.buffer.extend_from_slice(data);

        if inner.buffer.len() > inner.max_samples {
            let excess = inner.buffer.len() - inner.max_samples;
            inner.buffer.drain(..excess);
            if let Some(start) = inner.utterance_start.as_mut() {
                *start = start.saturating_sub(excess);
            }
            debug!("Audio buffer full, dropped {excess} oldest samples");
        }
    }
}

/// Cloneable, `Send` view of the recording buffer.
#[derive(Clone)]
pub struct RecorderHandle {
    shared: Arc<RecorderShared>,
}

impl RecorderHandle {
    /// Take everything recorded since the last take. Recording continues;
    /// only the buffered samples move out.
    pub fn take_chunk(&self) -> Vec<f32> {
        let mut inner = self.shared.inner.lock().unwrap();
        let chunk = std::mem::take(&mut inner.buffer);
        inner.utterance_start = None;
        chunk
    }

    /// Mark the start of a spoken command within the ongoing stream.
    pub fn begin_utterance(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        let at = inner.buffer.len();
        inner.utterance_start = Some(at);
    }

    /// Copy out the samples recorded since `begin_utterance`. The monitor
    /// buffer keeps them; coverage of the drive is never reduced.
    pub fn end_utterance(&self) -> Vec<f32> {
        let mut inner = self.shared.inner.lock().unwrap();
        match inner.utterance_start.take() {
            Some(start) if start < inner.buffer.len() => inner.buffer[start..].to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.shared.inner.lock().unwrap().recording
    }

    pub fn buffered_samples(&self) -> usize {
        self.shared.inner.lock().unwrap().buffer.len()
    }

    /// Feed samples directly into the buffer. The cpal callback uses the
    /// same path; tests drive it without audio hardware.
    pub fn ingest(&self, data: &[f32]) {
        self.shared.push(data);
    }

    #[cfg(test)]
    pub(crate) fn force_recording(&self, on: bool) {
        self.shared.set_recording(on);
    }
}

/// Encode f32 samples as a 16-bit PCM WAV for upload.
pub fn wav_encode(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, String> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| format!("Failed to create WAV writer: {e}"))?;
        for &sample in samples {
            // f32 [-1, 1] → i16
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(s)
                .map_err(|e| format!("Failed to write WAV sample: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| format!("Failed to finalize WAV: {e}"))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> RecorderHandle {
        let recorder = DriveRecorder::new(AudioConfig::default());
        let handle = recorder.handle();
        handle.force_recording(true);
        handle
    }

    #[test]
    fn take_chunk_drains_but_keeps_recording() {
        let handle = handle();
        handle.ingest(&[0.1; 1000]);

        let chunk = handle.take_chunk();
        assert_eq!(chunk.len(), 1000);
        assert_eq!(handle.buffered_samples(), 0);
        assert!(handle.is_recording());

        // Samples arriving after the take land in a fresh chunk
        handle.ingest(&[0.2; 500]);
        assert_eq!(handle.take_chunk().len(), 500);
    }

    #[test]
    fn utterance_covers_only_marked_span() {
        let handle = handle();
        handle.ingest(&[0.1; 300]);
        handle.begin_utterance();
        handle.ingest(&[0.2; 200]);

        let utterance = handle.end_utterance();
        assert_eq!(utterance.len(), 200);
        // The monitor chunk still has the full stream
        assert_eq!(handle.buffered_samples(), 500);
    }

    #[test]
    fn end_without_begin_yields_nothing() {
        let handle = handle();
        handle.ingest(&[0.1; 100]);
        assert!(handle.end_utterance().is_empty());
    }

    #[test]
    fn buffer_cap_drops_oldest() {
        let recorder = DriveRecorder::new(AudioConfig {
            sample_rate: 10, // tiny cap: 120 * 10 = 1200 samples
            ..AudioConfig::default()
        });
        let handle = recorder.handle();
        handle.force_recording(true);

        handle.ingest(&[0.1; 1200]);
        handle.ingest(&[0.2; 100]);
        assert_eq!(handle.buffered_samples(), 1200);
        let chunk = handle.take_chunk();
        // Newest samples survive at the tail
        assert!((chunk[1199] - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn not_recording_ignores_input() {
        let recorder = DriveRecorder::new(AudioConfig::default());
        let handle = recorder.handle();
        handle.ingest(&[0.1; 100]);
        assert_eq!(handle.buffered_samples(), 0);
    }

    #[test]
    fn wav_encode_produces_riff_header() {
        let bytes = wav_encode(&[0.0, 0.5, -0.5], 16000, 1).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte header + 3 samples * 2 bytes
        assert_eq!(bytes.len(), 44 + 6);
    }
}
