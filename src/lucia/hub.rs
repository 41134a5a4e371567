//! Outbound hub integration: REST service calls, presence, entity location.
//!
//! Timers and alarms reach devices through the home-automation hub's service
//! API.  The [`HubService`] trait carries the three calls the scheduled-task
//! engine needs (`play_media`, `volume_set`, `announce`) plus a generic
//! service call for tool-bound domains; [`HubClient`] is the production
//! implementation speaking HTTP+JSON with a bearer token.
//!
//! Presence-routed alarms resolve their target at fire time through the
//! [`PresenceService`] and [`EntityLocator`] seams, which the deployment backs
//! with its occupancy tracker and area registry.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::lucia::config::HubConfig;

/// Errors from hub service calls.
#[derive(Debug, Clone)]
pub enum HubError {
    Transport(String),
    Status(u16),
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Transport(msg) => write!(f, "hub transport error: {}", msg),
            HubError::Status(status) => write!(f, "hub returned HTTP {}", status),
        }
    }
}

impl Error for HubError {}

/// The hub calls the orchestration core makes.
#[async_trait]
pub trait HubService: Send + Sync {
    /// Generic `POST /api/services/{domain}/{service}`.
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        payload: serde_json::Value,
    ) -> Result<(), HubError>;

    /// `media_player.play_media` with `announce` semantics.
    async fn play_media(&self, entity_id: &str, media_content_id: &str) -> Result<(), HubError> {
        self.call_service(
            "media_player",
            "play_media",
            serde_json::json!({
                "entity_id": entity_id,
                "media_content_id": media_content_id,
                "media_content_type": "music",
                "announce": true,
            }),
        )
        .await
    }

    /// `media_player.volume_set`.
    async fn volume_set(&self, entity_id: &str, volume_level: f64) -> Result<(), HubError> {
        self.call_service(
            "media_player",
            "volume_set",
            serde_json::json!({
                "entity_id": entity_id,
                "volume_level": volume_level,
            }),
        )
        .await
    }

    /// `assist_satellite.announce`.
    async fn announce(&self, entity_id: &str, message: &str) -> Result<(), HubError> {
        self.call_service(
            "assist_satellite",
            "announce",
            serde_json::json!({
                "entity_id": entity_id,
                "message": message,
            }),
        )
        .await
    }
}

/// Production hub client.
pub struct HubClient {
    config: HubConfig,
    client: reqwest::Client,
}

impl HubClient {
    /// Build a client from the hub settings.
    ///
    /// A dedicated reqwest client is constructed here (rather than the shared
    /// one) because SSL validation is a per-hub setting.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(!config.validate_ssl)
            .build()
            .map_err(|e| HubError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl HubService for HubClient {
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        let url = format!(
            "{}/api/services/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            domain,
            service
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| HubError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            if log::log_enabled!(log::Level::Warn) {
                log::warn!("hub: {}.{} returned HTTP {}", domain, service, status);
            }
            return Err(HubError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// One occupied area reported by the presence tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupiedArea {
    pub area_id: String,
    pub name: String,
    /// Occupancy confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

/// Room-occupancy source used by presence-routed alarms.
#[async_trait]
pub trait PresenceService: Send + Sync {
    async fn occupied_areas(&self) -> Result<Vec<OccupiedArea>, Box<dyn Error + Send + Sync>>;
}

/// Maps an area to a playable media-player entity.
#[async_trait]
pub trait EntityLocator: Send + Sync {
    async fn media_player_in_area(
        &self,
        area_id: &str,
    ) -> Result<Option<String>, Box<dyn Error + Send + Sync>>;
}
