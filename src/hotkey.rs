//! Global voice-toggle hotkey using evdev.
//!
//! Monitors all keyboard devices for the configured combo and fires one
//! toggle per activation — the in-car equivalent of tapping the voice
//! button. Release is ignored; the next press toggles again.

use crate::config::HotkeyConfig;
use crate::session::SessionCommand;
use evdev::{Device, EventType, InputEventKind, Key};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Resolve a key name like "KEY_LEFTMETA" to an evdev Key code.
fn resolve_key(name: &str) -> Option<Key> {
    let key = match name {
        "KEY_LEFTMETA" => Key::KEY_LEFTMETA,
        "KEY_RIGHTMETA" => Key::KEY_RIGHTMETA,
        "KEY_LEFTALT" => Key::KEY_LEFTALT,
        "KEY_RIGHTALT" => Key::KEY_RIGHTALT,
        "KEY_LEFTCTRL" => Key::KEY_LEFTCTRL,
        "KEY_RIGHTCTRL" => Key::KEY_RIGHTCTRL,
        "KEY_LEFTSHIFT" => Key::KEY_LEFTSHIFT,
        "KEY_RIGHTSHIFT" => Key::KEY_RIGHTSHIFT,
        "KEY_PAGEDOWN" => Key::KEY_PAGEDOWN,
        "KEY_PAGEUP" => Key::KEY_PAGEUP,
        "KEY_RIGHT" => Key::KEY_RIGHT,
        "KEY_LEFT" => Key::KEY_LEFT,
        "KEY_UP" => Key::KEY_UP,
        "KEY_DOWN" => Key::KEY_DOWN,
        "KEY_SPACE" => Key::KEY_SPACE,
        "KEY_ENTER" => Key::KEY_ENTER,
        "KEY_TAB" => Key::KEY_TAB,
        "KEY_ESC" => Key::KEY_ESC,
        "KEY_F1" => Key::KEY_F1,
        "KEY_F2" => Key::KEY_F2,
        "KEY_F3" => Key::KEY_F3,
        "KEY_F4" => Key::KEY_F4,
        "KEY_F5" => Key::KEY_F5,
        "KEY_F6" => Key::KEY_F6,
        "KEY_F7" => Key::KEY_F7,
        "KEY_F8" => Key::KEY_F8,
        "KEY_F9" => Key::KEY_F9,
        "KEY_F10" => Key::KEY_F10,
        "KEY_F11" => Key::KEY_F11,
        "KEY_F12" => Key::KEY_F12,
        _ => {
            warn!("Unknown key name: {name}");
            return None;
        }
    };
    Some(key)
}

/// Shared state for tracking pressed keys across devices.
struct HotkeyState {
    pressed_keys: HashSet<Key>,
    hotkey_active: bool,
}

pub struct HotkeyMonitor {
    combos: Vec<HashSet<Key>>,
    state: Arc<Mutex<HotkeyState>>,
    tx: mpsc::Sender<SessionCommand>,
}

impl HotkeyMonitor {
    pub fn new(config: &HotkeyConfig, tx: mpsc::Sender<SessionCommand>) -> Self {
        let mut combos = Vec::new();

        let primary: HashSet<Key> = config.combo.iter().filter_map(|s| resolve_key(s)).collect();
        if !primary.is_empty() {
            combos.push(primary);
        }

        for alt in &config.alt_combos {
            let combo: HashSet<Key> = alt.iter().filter_map(|s| resolve_key(s)).collect();
            if !combo.is_empty() {
                combos.push(combo);
            }
        }

        info!("Voice hotkey: {} combo(s) configured", combos.len());

        Self {
            combos,
            state: Arc::new(Mutex::new(HotkeyState {
                pressed_keys: HashSet::new(),
                hotkey_active: false,
            })),
            tx,
        }
    }

    /// Find all keyboard input devices.
    fn find_keyboards() -> Vec<Device> {
        let mut keyboards = Vec::new();

        for (_path, device) in evdev::enumerate() {
            if let Some(keys) = device.supported_keys() {
                if keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER) {
                    info!(
                        "Found keyboard: {}",
                        device.name().unwrap_or("unknown")
                    );
                    keyboards.push(device);
                }
            }
        }

        keyboards
    }

    fn any_combo_active(combos: &[HashSet<Key>], pressed: &HashSet<Key>) -> bool {
        combos.iter().any(|combo| combo.is_subset(pressed))
    }

    /// Monitor a single device for key events.
    async fn monitor_device(
        device: Device,
        combos: Vec<HashSet<Key>>,
        state: Arc<Mutex<HotkeyState>>,
        tx: mpsc::Sender<SessionCommand>,
    ) {
        let name = device.name().unwrap_or("unknown").to_string();
        debug!("Monitoring {name}");

        let mut events = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot create event stream for {name}: {e}");
                return;
            }
        };

        loop {
            match events.next_event().await {
                Ok(event) => {
                    if event.event_type() != EventType::KEY {
                        continue;
                    }

                    let key = match event.kind() {
                        InputEventKind::Key(k) => k,
                        _ => continue,
                    };

                    let value = event.value();
                    // 0 = release, 1 = press, 2 = repeat
                    let mut state = state.lock().unwrap();

                    match value {
                        1 => {
                            state.pressed_keys.insert(key);
                        }
                        0 => {
                            state.pressed_keys.remove(&key);
                        }
                        _ => continue, // ignore repeats
                    }

                    let now_active = Self::any_combo_active(&combos, &state.pressed_keys);

                    if now_active && !state.hotkey_active {
                        state.hotkey_active = true;
                        debug!("Voice hotkey pressed");
                        let _ = tx.try_send(SessionCommand::ToggleVoice);
                    } else if !now_active && state.hotkey_active {
                        state.hotkey_active = false;
                    }
                }
                Err(e) => {
                    warn!("Device {name} disconnected: {e}");
                    break;
                }
            }
        }
    }

    /// Start monitoring all keyboards. Runs until all devices disconnect.
    /// Voice control degrades to the HTTP toggle when no keyboard exists.
    pub async fn run(self) {
        let keyboards = Self::find_keyboards();
        if keyboards.is_empty() {
            warn!("No keyboards found; voice toggle available via control API only");
            return;
        }

        info!("Monitoring {} keyboard(s)", keyboards.len());

        let mut handles = Vec::new();
        for device in keyboards {
            let combos = self.combos.clone();
            let state = Arc::clone(&self.state);
            let tx = self.tx.clone();
            handles.push(tokio::spawn(Self::monitor_device(device, combos, state, tx)));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
