//! Local Kokoro TTS engine: text → phonemes → ONNX inference → playback.
//!
//! The on-device half of the speech-output pair. Loads the configured voice
//! once, synthesizes sentence by sentence, and plays through a rodio sink
//! that `cancel` can stop mid-intervention.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::TtsConfig;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

/// Native Kokoro TTS engine carrying one voice.
pub struct KokoroEngine {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<Option<ort::session::Session>>,

    // Phonemizer (misaki-rs G2P)
    phonemizer: Option<misaki_rs::G2P>,

    // Tokenizer vocabulary: char → token ID
    vocab: HashMap<char, i64>,

    // Style vectors for the configured voice, indexed by token count
    styles: Option<Array2<f32>>,

    voice: String,
    speed: f32,

    // Audio output (kept alive for process lifetime)
    output_stream: Option<OutputStream>,

    cancel_flag: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    speak_lock: AsyncMutex<()>,
    active_sink: Arc<Mutex<Option<Sink>>>,

    model_path: PathBuf,
    voices_path: PathBuf,
    tokenizer_path: PathBuf,
}

impl KokoroEngine {
    pub fn new(config: &TtsConfig) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_default();

        let model_path = if config.model_path.is_empty() {
            base_dir.join("kokoro-v1.0.onnx")
        } else {
            PathBuf::from(&config.model_path)
        };

        let voices_path = base_dir.join("voices-v1.0.bin");
        let tokenizer_path = base_dir.join("tokenizer.json");

        Self {
            session: Mutex::new(None),
            phonemizer: None,
            vocab: HashMap::new(),
            styles: None,
            voice: config.voice.clone(),
            speed: config.speed,
            output_stream: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            speaking: Arc::new(AtomicBool::new(false)),
            speak_lock: AsyncMutex::new(()),
            active_sink: Arc::new(Mutex::new(None)),
            model_path,
            voices_path,
            tokenizer_path,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Load the ONNX model, tokenizer, voice style, and phonemizer.
    /// Blocking; call from `spawn_blocking` or before the runtime is busy.
    pub fn load(&mut self) -> Result<(), String> {
        let t0 = Instant::now();

        info!("Loading tokenizer from {}", self.tokenizer_path.display());
        self.vocab = load_tokenizer(&self.tokenizer_path)?;

        info!(
            "Loading voice '{}' from {}",
            self.voice,
            self.voices_path.display()
        );
        self.styles = Some(load_voice(&self.voices_path, &self.voice)?);

        info!("Loading ONNX model from {}", self.model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create ONNX session builder: {e}"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| format!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| format!("Failed to set thread count: {e}"))?
            .commit_from_file(&self.model_path)
            .map_err(|e| format!("Failed to load ONNX model: {e}"))?;
        *self.session.lock().unwrap() = Some(session);

        self.phonemizer = Some(misaki_rs::G2P::new(misaki_rs::Language::EnglishUS));

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"))?;
        self.output_stream = Some(stream);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());
        Ok(())
    }

    /// Speak text aloud, sentence by sentence. Returns true if cancelled
    /// before finishing.
    pub async fn speak(&self, text: &str) -> Result<bool, String> {
        if !self.is_loaded() {
            return Err("Kokoro model not loaded".into());
        }

        let _guard = self.speak_lock.lock().await;
        self.cancel_flag.store(false, Ordering::Relaxed);
        self.speaking.store(true, Ordering::Relaxed);

        let result = self.speak_inner(text).await;

        self.speaking.store(false, Ordering::Relaxed);
        result
    }

    async fn speak_inner(&self, text: &str) -> Result<bool, String> {
        let sentences = split_sentences(text.trim());

        for (i, sentence) in sentences.iter().enumerate() {
            if self.cancel_flag.load(Ordering::Relaxed) {
                debug!("Speech cancelled before sentence {}/{}", i + 1, sentences.len());
                return Ok(true);
            }

            let samples = match self.generate_audio(sentence) {
                Ok(s) => s,
                Err(e) => {
                    warn!("TTS generation failed for sentence {}: {e}", i + 1);
                    continue;
                }
            };

            if self.cancel_flag.load(Ordering::Relaxed) {
                return Ok(true);
            }
            if samples.is_empty() {
                continue;
            }

            if self.play_audio(samples).await {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut session_guard = self.session.lock().unwrap();
        let session = session_guard.as_mut().ok_or("Model not loaded")?;
        let phonemizer = self.phonemizer.as_ref().ok_or("Phonemizer not loaded")?;
        let styles = self.styles.as_ref().ok_or("Voice not loaded")?;

        let (phonemes, _tokens) = phonemizer
            .g2p(text)
            .map_err(|e| format!("Phonemization failed: {e}"))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // Phonemes → token IDs, padded on both ends
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        for ch in phonemes.chars() {
            if let Some(&id) = self.vocab.get(&ch) {
                token_ids.push(id);
            }
        }
        token_ids.push(0);

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        // Style vector is indexed by token count (clamped to the table)
        let style_idx = (n_tokens.saturating_sub(2)).min(styles.nrows() - 1);
        let style_vec: Vec<f32> = styles.row(style_idx).to_vec();

        let tokens_array = ndarray::Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| format!("Failed to create tokens tensor: {e}"))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| format!("Failed to create tokens ort tensor: {e}"))?;

        let style_array = ndarray::Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| format!("Failed to create style tensor: {e}"))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| format!("Failed to create style ort tensor: {e}"))?;

        let speed_array = ndarray::Array1::from_vec(vec![self.speed]);
        let speed_tensor = Tensor::from_array(speed_array)
            .map_err(|e| format!("Failed to create speed ort tensor: {e}"))?;

        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| format!("ONNX inference failed: {e}"))?;

        let first_output = outputs
            .iter()
            .next()
            .ok_or("No output tensor from model")?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract audio tensor: {e}"))?;

        let samples: Vec<f32> = audio_slice.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        Ok(samples)
    }

    /// Play samples through rodio. Returns true if cancelled mid-playback.
    async fn play_audio(&self, samples: Vec<f32>) -> bool {
        let stream = match &self.output_stream {
            Some(s) => s,
            None => {
                warn!("No audio output stream");
                return false;
            }
        };

        let sink = Sink::connect_new(stream.mixer());
        let source = SamplesBuffer::new(1, SAMPLE_RATE, samples);
        sink.append(source);

        *self.active_sink.lock().unwrap() = Some(sink);

        let cancel_flag = self.cancel_flag.clone();
        let active_sink = self.active_sink.clone();

        let was_cancelled = tokio::task::spawn_blocking(move || {
            loop {
                let is_empty = {
                    let guard = active_sink.lock().unwrap();
                    match guard.as_ref() {
                        Some(s) => s.empty(),
                        None => true,
                    }
                };

                if is_empty {
                    return false;
                }

                if cancel_flag.load(Ordering::Relaxed) {
                    if let Some(sink) = active_sink.lock().unwrap().take() {
                        sink.stop();
                    }
                    return true;
                }

                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        })
        .await
        .unwrap_or(false);

        *self.active_sink.lock().unwrap() = None;

        was_cancelled
    }

    /// Stop current speech immediately. Safe to call when idle.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(sink) = self.active_sink.lock().unwrap().take() {
            sink.stop();
        }
        self.speaking.store(false, Ordering::Relaxed);
    }
}

// --- Helper functions ---

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read tokenizer: {e}"))?;

    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse tokenizer JSON: {e}"))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or("Missing model.vocab in tokenizer.json")?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id.as_i64().ok_or("Token ID is not an integer")?;
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load one voice's style table from the NPZ voices file.
/// Shape on disk is (510, 1, 256); squeezed to (510, 256).
fn load_voice(path: &Path, voice: &str) -> Result<Array2<f32>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to open voices file: {e}"))?;

    let mut npz =
        NpzReader::new(file).map_err(|e| format!("Failed to read NPZ voices file: {e}"))?;

    let arr: Array3<f32> = npz
        .by_name(&format!("{voice}.npy"))
        .map_err(|e| format!("Voice '{voice}' not found in voices file: {e}"))?;

    let dim0 = arr.shape()[0];
    let dim2 = arr.shape()[2];
    arr.into_shape_with_order((dim0, dim2))
        .map_err(|e| format!("Failed to reshape voice '{voice}': {e}"))
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}
