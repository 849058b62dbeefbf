//! Desktop notifications via notify-rust (D-Bus).
//!
//! The headless service's rendition of the in-drive panels: intervention
//! cards and reroute banners surface as notifications.

use notify_rust::{Notification, Urgency};
use tracing::{debug, warn};

use crate::api::{Intervention, InterventionType, RerouteOffer};

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Show an intervention card.
    pub fn intervention(&self, intervention: &Intervention) {
        let summary = match intervention.intervention_type {
            InterventionType::PullOver => "Serene: let's find a safe place to stop",
            InterventionType::Breathing => "Serene: breathing exercise",
            InterventionType::Grounding => "Serene: grounding exercise",
            InterventionType::Calming | InterventionType::None => "Serene",
        };
        let urgency = match intervention.intervention_type {
            InterventionType::PullOver => Urgency::Critical,
            _ => Urgency::Normal,
        };
        self.show(summary, &intervention.message, urgency, 0);
    }

    /// Show a standalone calmer-route banner.
    pub fn reroute_offer(&self, offer: &RerouteOffer) {
        let body = format!(
            "{} is {} points calmer (+{} min)",
            offer.name, offer.calm_score_improvement, offer.extra_time_minutes
        );
        self.show("Serene: calmer route available", &body, Urgency::Normal, 10000);
    }

    /// Plain informational notification (drive started/ended).
    pub fn info(&self, summary: &str, body: &str) {
        self.show(summary, body, Urgency::Low, 3000);
    }

    fn show(&self, summary: &str, body: &str, urgency: Urgency, timeout_ms: i32) {
        if !self.enabled {
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("audio-input-microphone")
            .urgency(urgency)
            .timeout(timeout_ms)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
