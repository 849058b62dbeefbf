//! serene-drive-rs: in-drive stress monitoring and voice companion service.

mod activity;
mod api;
mod arbiter;
mod config;
mod control;
mod history;
mod hotkey;
mod monitor;
mod notifier;
mod provider;
mod recorder;
mod reroute;
mod session;
mod stt;
#[cfg(test)]
mod testutil;
mod tts;
mod voice;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::tts::Speaker;

#[derive(Parser, Debug)]
#[command(name = "serene-drive-rs", about = "In-drive stress monitoring and voice companion")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured user id
    #[arg(short, long)]
    user: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info,hyper=info")
    } else {
        EnvFilter::new("info,ort=warn,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("serene-drive-rs starting");

    let mut config = config::Config::load(args.config.as_deref());
    if let Some(user) = args.user {
        config.backend.user_id = user;
    }
    if config.backend.user_id.is_empty() {
        return Err("No user id configured (set backend.user_id or pass --user)".into());
    }
    info!("Monitoring drives for user {}", config.backend.user_id);

    // Load the local Whisper recognizer (blocking, takes a few seconds).
    // Without it, speech input runs cloud-only.
    let whisper = tokio::task::spawn_blocking({
        let whisper_config = config.whisper.clone();
        move || stt::whisper::WhisperRecognizer::load(&whisper_config)
    })
    .await?;
    let whisper = match whisper {
        Ok(recognizer) => Some(recognizer),
        Err(e) => {
            warn!("Whisper unavailable: {e}; speech input is cloud-only");
            None
        }
    };

    // Load the local Kokoro voice. Without it, speech output is cloud-only.
    let mut kokoro = tts::kokoro::KokoroEngine::new(&config.tts);
    if let Err(e) = kokoro.load() {
        warn!("Kokoro unavailable: {e}; speech output is cloud-only");
    }
    let kokoro = Arc::new(kokoro);

    let client = Arc::new(api::SereneClient::new(&config.backend));
    let log = Arc::new(history::DriveLog::new());
    let notifier = Arc::new(notifier::Notifier::new(config.feedback.notifications));
    let state = Arc::new(session::DriveState::new());
    let gate = activity::ActivityGate::new();

    let speech_in = Arc::new(stt::SpeechInput::new(
        &config.speech,
        whisper,
        config.audio.sample_rate,
    ));
    let speech_out = Arc::new(tts::SpeechOutput::new(&config.speech, Arc::clone(&kokoro)));
    let speaker: Arc<dyn Speaker> = Arc::clone(&speech_out) as Arc<dyn Speaker>;

    let reroute = Arc::new(reroute::RerouteCoordinator::new(
        Arc::clone(&client),
        Arc::clone(&log),
    ));
    let arbiter = Arc::new(arbiter::InterventionArbiter::new(
        Arc::clone(&speaker),
        Arc::clone(&notifier),
        reroute,
        Arc::clone(&log),
    ));

    let recorder = recorder::DriveRecorder::new(config.audio.clone());
    let recorder_handle = recorder.handle();

    let monitor = Arc::new(monitor::StressMonitor::new(
        Arc::clone(&client),
        gate.clone(),
        Arc::clone(&arbiter),
        recorder_handle.clone(),
        Arc::clone(&state),
        Arc::clone(&log),
        config.audio.sample_rate,
    ));

    let (command_tx, command_rx) = mpsc::channel::<session::SessionCommand>(16);

    let voice = Arc::new(voice::VoiceCommandPipeline::new(
        recorder_handle,
        Arc::clone(&speech_in),
        Arc::clone(&speaker),
        Arc::clone(&client),
        Arc::clone(&arbiter),
        gate.clone(),
        Arc::clone(&state),
        Arc::clone(&notifier),
        Arc::clone(&log),
        command_tx.clone(),
        std::time::Duration::from_secs_f64(config.monitor.max_utterance_secs),
    ));

    // Voice hotkey in the background
    let hotkey_monitor = hotkey::HotkeyMonitor::new(&config.hotkey, command_tx.clone());
    tokio::spawn(async move {
        hotkey_monitor.run().await;
    });

    // Control API in the background
    if config.control.enabled {
        control::start_control_api(
            control::ControlState {
                commands: command_tx.clone(),
                drive: Arc::clone(&state),
                arbiter: Arc::clone(&arbiter),
                voice: Arc::clone(&voice),
                gate: gate.clone(),
                speech_in: Arc::clone(&speech_in),
                speech_out: Arc::clone(&speech_out),
            },
            config.control.port,
        )
        .await;
    }

    let mut controller = session::SessionController::new(
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
    );

    controller.run(command_rx).await;

    Ok(())
}
