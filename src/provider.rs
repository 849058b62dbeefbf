//! Per-capability speech provider selection.
//!
//! Speech input (transcription) and speech output (synthesis) each start on
//! the cloud provider and switch to the local engine for the rest of the
//! session when the cloud side reports it is not provisioned. The two
//! capabilities downgrade independently.

use std::sync::atomic::{AtomicBool, Ordering};

/// Failure of a cloud speech call. HTTP 503 is the provisioning signal the
/// backend uses for "no credential configured"; everything else is treated
/// as transient by callers.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("cloud speech service not provisioned")]
    NotProvisioned,
    #[error("cloud speech service returned status {0}")]
    Status(u16),
    #[error("cloud speech request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CloudError {
    /// Map a non-success HTTP status to the right variant.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            Self::NotProvisioned
        } else {
            Self::Status(status.as_u16())
        }
    }
}

/// Which provider a speech capability is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Cloud,
    Local,
}

impl std::fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Session-scoped provider switch with a single legal transition:
/// `Cloud → Local`. There is no way back within a session.
pub struct ProviderSwitch {
    capability: &'static str,
    downgraded: AtomicBool,
}

impl ProviderSwitch {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            downgraded: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> ProviderMode {
        if self.downgraded.load(Ordering::Relaxed) {
            ProviderMode::Local
        } else {
            ProviderMode::Cloud
        }
    }

    /// Permanently switch this capability to the local provider.
    pub fn downgrade(&self) {
        if !self.downgraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "{} provider not provisioned, using local engine for the rest of the session",
                self.capability
            );
        }
    }
}
