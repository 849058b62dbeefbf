//! Intervention arbitration.
//!
//! The single gate for what the driver sees. A candidate intervention from
//! either the stress monitor or the voice pipeline becomes visible only if
//! nothing else is; a later candidate is dropped while one is showing
//! (first-wins). The visible intervention's message is spoken exactly once,
//! and dismissal always stops speech before hiding the panel.

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::api::Intervention;
use crate::history::{DriveEventRecord, DriveLog};
use crate::notifier::Notifier;
use crate::reroute::RerouteCoordinator;
use crate::tts::Speaker;

/// What the driver chose on a visible intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionAction {
    AcceptReroute,
    KeepCurrent,
}

struct VisibleIntervention {
    intervention: Intervention,
    spoken: bool,
}

pub struct InterventionArbiter {
    speaker: Arc<dyn Speaker>,
    notifier: Arc<Notifier>,
    reroute: Arc<RerouteCoordinator>,
    log: Arc<DriveLog>,
    current: Mutex<Option<VisibleIntervention>>,
}

impl InterventionArbiter {
    pub fn new(
        speaker: Arc<dyn Speaker>,
        notifier: Arc<Notifier>,
        reroute: Arc<RerouteCoordinator>,
        log: Arc<DriveLog>,
    ) -> Self {
        Self {
            speaker,
            notifier,
            reroute,
            log,
            current: Mutex::new(None),
        }
    }

    pub fn visible(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    pub fn current(&self) -> Option<Intervention> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .map(|v| v.intervention.clone())
    }

    /// Offer a candidate intervention. Returns false if one is already
    /// visible (the candidate is dropped, not queued).
    pub async fn submit(&self, drive_id: &str, intervention: Intervention) -> bool {
        {
            let mut current = self.current.lock().unwrap();
            if current.is_some() {
                debug!(
                    "Dropping {:?} candidate: an intervention is already visible",
                    intervention.intervention_type
                );
                return false;
            }
            *current = Some(VisibleIntervention {
                intervention: intervention.clone(),
                spoken: false,
            });
        }

        info!(
            "Intervention visible: {:?} ({:?})",
            intervention.intervention_type, intervention.stress_level
        );
        self.notifier.intervention(&intervention);
        self.log.record(
            DriveEventRecord::new(drive_id, "INTERVENTION_SHOWN")
                .with_stress(
                    intervention.stress_score,
                    &format!("{:?}", intervention.stress_level).to_uppercase(),
                )
                .with_detail(format!("{:?}", intervention.intervention_type)),
        );

        self.announce().await;
        true
    }

    /// Speak the visible intervention's message, at most once per instance
    /// no matter how many times the panel is re-presented.
    pub async fn announce(&self) {
        let message = {
            let mut current = self.current.lock().unwrap();
            match current.as_mut() {
                Some(v) if !v.spoken => {
                    v.spoken = true;
                    v.intervention.message.clone()
                }
                _ => return,
            }
        };

        self.speaker.speak(&message).await;
    }

    /// Hide the visible intervention. Speech stops before the panel hides
    /// so no audio outlives it. Safe to call when nothing is visible.
    pub async fn dismiss(&self) {
        self.speaker.stop().await;
        let was_visible = self.current.lock().unwrap().take();
        if was_visible.is_some() {
            info!("Intervention dismissed");
        }
    }

    /// Resolve the visible intervention with a driver action.
    pub async fn act(&self, drive_id: &str, action: InterventionAction) {
        if action == InterventionAction::AcceptReroute {
            let offer = self
                .current
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|v| v.intervention.reroute.as_ref())
                .and_then(|r| r.suggested_route.clone());

            match offer {
                Some(offer) => self.reroute.accept(drive_id, &offer).await,
                None => debug!("Accept ignored: visible intervention has no reroute offer"),
            }
        }

        self.dismiss().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{InterventionType, RerouteOffer, RerouteResult};
    use crate::testutil::{arbiter_with, intervention, RecordingSpeaker};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn submit_speaks_message_once() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        let arbiter = arbiter_with(speaker.clone(), &server);

        let shown = arbiter
            .submit("drive-1", intervention(InterventionType::Breathing, "Breathe with me."))
            .await;
        assert!(shown);
        assert!(arbiter.visible());

        // Re-presenting the same instance never re-triggers speech
        arbiter.announce().await;
        arbiter.announce().await;
        assert_eq!(speaker.spoken.lock().unwrap().as_slice(), ["Breathe with me."]);
    }

    #[tokio::test]
    async fn first_wins_drops_later_candidates() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        let arbiter = arbiter_with(speaker.clone(), &server);

        arbiter
            .submit("drive-1", intervention(InterventionType::Calming, "You're okay."))
            .await;
        let second = arbiter
            .submit("drive-1", intervention(InterventionType::PullOver, "Pull over."))
            .await;

        assert!(!second);
        let visible = arbiter.current().unwrap();
        assert_eq!(visible.intervention_type, InterventionType::Calming);
        // Only the first message was spoken
        assert_eq!(speaker.spoken.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dismiss_stops_speech_then_hides() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        let arbiter = arbiter_with(speaker.clone(), &server);

        arbiter
            .submit("drive-1", intervention(InterventionType::Breathing, "Breathe."))
            .await;
        arbiter.dismiss().await;

        assert!(!arbiter.visible());
        assert_eq!(*speaker.stops.lock().unwrap(), 1);

        // A new candidate is accepted after dismissal
        assert!(
            arbiter
                .submit("drive-1", intervention(InterventionType::Calming, "Still here."))
                .await
        );
    }

    #[tokio::test]
    async fn dismiss_when_hidden_is_a_noop() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        let arbiter = arbiter_with(speaker.clone(), &server);

        arbiter.dismiss().await;
        arbiter.dismiss().await;
        assert!(!arbiter.visible());
    }

    #[tokio::test]
    async fn accept_reroute_records_then_dismisses() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/drives/drive-1/accept-reroute"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let arbiter = arbiter_with(speaker.clone(), &server);

        let mut iv = intervention(InterventionType::Calming, "A calmer route exists.");
        iv.reroute = Some(RerouteResult {
            reroute_available: true,
            message: None,
            current_route: None,
            suggested_route: Some(RerouteOffer {
                name: "Riverside Ave".into(),
                calm_score: 82,
                duration_minutes: None,
                distance_km: None,
                extra_time_minutes: 6,
                calm_score_improvement: 27,
                maps_url: "https://maps.example/riverside".into(),
            }),
        });

        arbiter.submit("drive-1", iv).await;
        arbiter.act("drive-1", InterventionAction::AcceptReroute).await;
        assert!(!arbiter.visible());
    }

    #[tokio::test]
    async fn act_dismisses_even_when_record_fails() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/drives/drive-1/accept-reroute"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let arbiter = arbiter_with(speaker.clone(), &server);

        let mut iv = intervention(InterventionType::Calming, "A calmer route exists.");
        iv.reroute = Some(RerouteResult {
            reroute_available: true,
            message: None,
            current_route: None,
            suggested_route: Some(RerouteOffer {
                name: "Riverside Ave".into(),
                calm_score: 82,
                duration_minutes: None,
                distance_km: None,
                extra_time_minutes: 6,
                calm_score_improvement: 27,
                maps_url: "https://maps.example/riverside".into(),
            }),
        });

        arbiter.submit("drive-1", iv).await;
        arbiter.act("drive-1", InterventionAction::AcceptReroute).await;

        // The record call failed but the intervention is still resolved
        assert!(!arbiter.visible());
    }

    #[tokio::test]
    async fn keep_current_just_dismisses() {
        let speaker = RecordingSpeaker::new();
        let server = MockServer::start().await;
        let arbiter = arbiter_with(speaker.clone(), &server);

        arbiter
            .submit("drive-1", intervention(InterventionType::Calming, "Offer."))
            .await;
        arbiter.act("drive-1", InterventionAction::KeepCurrent).await;

        assert!(!arbiter.visible());
        // No backend call was attempted (no mock mounted, no panic)
    }
}
