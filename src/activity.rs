//! In-drive activity coordination.
//!
//! One coordinator owns the "what is the system busy with" state that the
//! stress monitor and the voice pipeline contend over. Entry is a checked
//! transition that hands back a permit; dropping the permit returns the
//! state to idle, so the slot is released on every exit path including
//! errors.

use std::sync::{Arc, Mutex};

/// What the in-drive engine is currently busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    /// A stress-analysis call is in flight.
    Analyzing,
    /// The driver is mid-command: capturing, transcribing, or dispatching.
    VoiceActive,
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Analyzing => write!(f, "ANALYZING"),
            Self::VoiceActive => write!(f, "VOICE_ACTIVE"),
        }
    }
}

/// Shared gate over the analysis/voice slots.
#[derive(Clone)]
pub struct ActivityGate {
    current: Arc<Mutex<Activity>>,
}

impl ActivityGate {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Activity::Idle)),
        }
    }

    pub fn current(&self) -> Activity {
        *self.current.lock().unwrap()
    }

    pub fn is_idle(&self) -> bool {
        self.current() == Activity::Idle
    }

    /// Claim the analysis slot. Fails if anything else is running.
    pub fn begin_analysis(&self) -> Option<ActivityPermit> {
        self.begin(Activity::Analyzing)
    }

    /// Claim the voice slot. Fails if anything else is running.
    pub fn begin_voice(&self) -> Option<ActivityPermit> {
        self.begin(Activity::VoiceActive)
    }

    fn begin(&self, activity: Activity) -> Option<ActivityPermit> {
        let mut current = self.current.lock().unwrap();
        if *current != Activity::Idle {
            return None;
        }
        *current = activity;
        tracing::debug!("Activity: IDLE → {activity}");
        Some(ActivityPermit {
            gate: Arc::clone(&self.current),
        })
    }
}

impl Default for ActivityGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while an analysis or voice command is in flight; releasing the slot
/// happens on drop.
pub struct ActivityPermit {
    gate: Arc<Mutex<Activity>>,
}

impl Drop for ActivityPermit {
    fn drop(&mut self) {
        let mut current = self.gate.lock().unwrap();
        tracing::debug!("Activity: {} → IDLE", *current);
        *current = Activity::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_mutually_exclusive() {
        let gate = ActivityGate::new();

        let analysis = gate.begin_analysis();
        assert!(analysis.is_some());
        // Neither slot can be claimed while analysis runs
        assert!(gate.begin_voice().is_none());
        assert!(gate.begin_analysis().is_none());
        assert_eq!(gate.current(), Activity::Analyzing);

        drop(analysis);
        assert!(gate.is_idle());
    }

    #[test]
    fn voice_blocks_analysis() {
        let gate = ActivityGate::new();
        let voice = gate.begin_voice();
        assert!(voice.is_some());
        assert!(gate.begin_analysis().is_none());
        drop(voice);
        assert!(gate.begin_analysis().is_some());
    }

    #[test]
    fn permit_releases_on_unwind_path() {
        // Drop inside a closure that errors out still releases the slot.
        let gate = ActivityGate::new();
        let result: Result<(), ()> = (|| {
            let _permit = gate.begin_voice().ok_or(())?;
            Err(())
        })();
        assert!(result.is_err());
        assert!(gate.is_idle());
    }

    #[test]
    fn clones_share_state() {
        let gate = ActivityGate::new();
        let other = gate.clone();
        let _permit = gate.begin_analysis().unwrap();
        assert_eq!(other.current(), Activity::Analyzing);
        assert!(other.begin_voice().is_none());
    }
}
