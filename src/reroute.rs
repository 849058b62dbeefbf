//! Reroute acceptance handshake.
//!
//! Accepting an offer records the acceptance with the backend and opens the
//! route's navigation deep link. Recording is best-effort telemetry; the
//! deep link opens whether or not the backend call succeeds.

use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::{RerouteOffer, SereneClient};
use crate::history::{DriveEventRecord, DriveLog};

/// Opens a navigation deep link. The production implementation shells out
/// to `xdg-open`; tests substitute a recorder.
pub trait Navigator: Send + Sync {
    fn open(&self, url: &str);
}

pub struct XdgOpenNavigator;

impl Navigator for XdgOpenNavigator {
    fn open(&self, url: &str) {
        match Command::new("xdg-open").arg(url).spawn() {
            Ok(_) => info!("Opened navigation link"),
            Err(e) => warn!("Failed to open navigation link: {e}"),
        }
    }
}

pub struct RerouteCoordinator {
    client: Arc<SereneClient>,
    navigator: Box<dyn Navigator>,
    log: Arc<DriveLog>,
}

impl RerouteCoordinator {
    pub fn new(client: Arc<SereneClient>, log: Arc<DriveLog>) -> Self {
        Self::with_navigator(client, log, Box::new(XdgOpenNavigator))
    }

    pub fn with_navigator(
        client: Arc<SereneClient>,
        log: Arc<DriveLog>,
        navigator: Box<dyn Navigator>,
    ) -> Self {
        Self {
            client,
            navigator,
            log,
        }
    }

    /// Record the acceptance, then open navigation regardless of outcome.
    pub async fn accept(&self, drive_id: &str, offer: &RerouteOffer) {
        if let Err(e) = self
            .client
            .accept_reroute(drive_id, &offer.name, Some(offer.calm_score_improvement))
            .await
        {
            warn!("Failed to record reroute acceptance: {e}");
        }

        self.navigator.open(&offer.maps_url);
        self.log.record(
            DriveEventRecord::new(drive_id, "REROUTE_ACCEPTED").with_detail(offer.name.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub struct RecordingNavigator {
        pub opened: Arc<Mutex<Vec<String>>>,
    }

    impl Navigator for RecordingNavigator {
        fn open(&self, url: &str) {
            self.opened.lock().unwrap().push(url.to_string());
        }
    }

    fn offer() -> RerouteOffer {
        RerouteOffer {
            name: "Riverside Ave".into(),
            calm_score: 82,
            duration_minutes: Some(24),
            distance_km: Some(12.5),
            extra_time_minutes: 6,
            calm_score_improvement: 27,
            maps_url: "https://maps.example/riverside".into(),
        }
    }

    fn coordinator(server: &MockServer, opened: Arc<Mutex<Vec<String>>>) -> RerouteCoordinator {
        let client = Arc::new(SereneClient::new(&BackendConfig {
            base_url: server.uri(),
            user_id: "driver-1".into(),
            request_timeout_secs: 5,
        }));
        RerouteCoordinator::with_navigator(
            client,
            Arc::new(DriveLog::disabled()),
            Box::new(RecordingNavigator { opened }),
        )
    }

    #[tokio::test]
    async fn accept_records_and_navigates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/drives/drive-1/accept-reroute"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let opened = Arc::new(Mutex::new(Vec::new()));
        coordinator(&server, opened.clone())
            .accept("drive-1", &offer())
            .await;

        assert_eq!(opened.lock().unwrap().as_slice(), ["https://maps.example/riverside"]);
    }

    #[tokio::test]
    async fn navigation_opens_even_when_record_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/drives/drive-1/accept-reroute"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let opened = Arc::new(Mutex::new(Vec::new()));
        coordinator(&server, opened.clone())
            .accept("drive-1", &offer())
            .await;

        // Recording failed, navigation still happened
        assert_eq!(opened.lock().unwrap().len(), 1);
    }
}
