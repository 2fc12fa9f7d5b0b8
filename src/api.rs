use anyhow::{Context, Result};
use log::{debug, warning};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::auth;

/// One cooldown-gated presence registration, emitted by the recognition
/// worker whenever a label's timestamp refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub label: String,
    pub confidence: f64,
    pub at: u64,
}

impl PresenceEvent {
    pub fn now(label: &str, confidence: f64) -> Self {
        let at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            label: label.to_owned(),
            confidence,
            at,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EntryRequest {
    person_id: String,
    action: String,
    at: u64,
}

struct ApiSpec {
    base_url: String,
}

impl ApiSpec {
    fn new(base_url: String) -> Self {
        Self { base_url }
    }

    fn entry_url(&self) -> String {
        format!("{}/api/entry", self.base_url)
    }

    fn entry_hmac(&self) -> String {
        auth::compute_hmac(&self.entry_url())
    }
}

/// Client for the surrounding web application's entry endpoint.
pub struct Api {
    spec: ApiSpec,
    client: reqwest::Client,
}

impl Api {
    pub fn new(base_url: &str) -> Self {
        Self {
            spec: ApiSpec::new(base_url.trim_end_matches('/').to_owned()),
            client: reqwest::Client::new(),
        }
    }

    pub async fn add_presence(&self, event: &PresenceEvent) -> Result<()> {
        let request = EntryRequest {
            person_id: event.label.clone(),
            action: "present".to_owned(),
            at: event.at,
        };

        self.client
            .post(self.spec.entry_url())
            .header(auth::API_KEY_HEADER, self.spec.entry_hmac())
            .json(&request)
            .send()
            .await
            .context("posting presence event")?
            .error_for_status()
            .context("backend rejected presence event")?;

        Ok(())
    }
}

/// Forwards presence events to the backend until the channel closes.
/// Delivery is best effort; a failed post is logged and dropped.
pub async fn run_notifier(api: Api, mut events: mpsc::UnboundedReceiver<PresenceEvent>) {
    while let Some(event) = events.recv().await {
        debug!("Forwarding presence event for {}", event.label);
        if let Err(e) = api.add_presence(&event).await {
            warning!("Failed to deliver presence event for {}: {e:#}", event.label);
        }
    }
    debug!("Presence notifier exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_url_and_signature_come_from_the_base_url() {
        let api = Api::new("http://localhost:8000/");
        assert_eq!(api.spec.entry_url(), "http://localhost:8000/api/entry");
        assert!(auth::verify_api_key(
            &api.spec.entry_hmac(),
            "http://localhost:8000/api/entry"
        ));
    }

    #[test]
    fn entry_requests_serialize_to_the_wire_shape() {
        let request = EntryRequest {
            person_id: "23CSEAIML087".to_owned(),
            action: "present".to_owned(),
            at: 1_700_000_000,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["person_id"], "23CSEAIML087");
        assert_eq!(json["action"], "present");
        assert_eq!(json["at"], 1_700_000_000_u64);
    }
}
