//! Device profile resolution
//!
//! A profile tells the activation driver how to address a light. Metadata is
//! fetched once per device through a template render and cached for the
//! lifetime of the process. Resolution never fails and each lookup is time
//! bounded: when metadata cannot be read in time the entity id alone decides.

use crate::client::HassApi;
use crate::error_recovery::CallOutcome;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Vendors whose colour bulbs drop brightness when colour and brightness
/// arrive in the same command while switching colour mode
static SPLIT_VENDOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(ikea|tradfri)").expect("static regex is valid"));

/// Radio or network the device is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMedium {
    Zigbee,
    Zwave,
    Thread,
    Wifi,
    Bluetooth,
    Unknown,
}

/// Where a profile's classification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    /// Device registry metadata
    Metadata,
    /// Entity id heuristic only
    EntityId,
}

/// Classification of one light device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub entity_id: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub integration: Option<String>,
    pub connection: ConnectionMedium,
    /// Colour and brightness must be sent as two separate commands
    pub split_sequencing: bool,
    pub source: ProfileSource,
}

/// Device registry fields rendered by [`METADATA_TEMPLATE`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceMetadata {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub integration: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

const METADATA_TEMPLATE: &str = r#"{% set e = '__ENTITY__' %}{% set ids = (device_attr(e, 'identifiers') or []) | list %}{{ {'manufacturer': device_attr(e, 'manufacturer'), 'model': device_attr(e, 'model'), 'integration': (ids[0][0] if ids else none), 'identifier': ((ids[0][1] | string) if ids else none)} | tojson }}"#;

/// Template that renders the device metadata of `entity_id` as JSON
pub fn metadata_template(entity_id: &str) -> String {
    METADATA_TEMPLATE.replace("__ENTITY__", entity_id)
}

/// Resolves and caches device profiles
pub struct DeviceProfileResolver {
    api: Arc<HassApi>,
    lookup_timeout: Duration,
    cache: RwLock<HashMap<String, DeviceProfile>>,
}

impl DeviceProfileResolver {
    pub fn new(api: Arc<HassApi>, lookup_timeout: Duration) -> Self {
        Self {
            api,
            lookup_timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Profile for a device. Never fails.
    ///
    /// The first answer is memoized for the lifetime of the resolver, including
    /// entity-id fallbacks after a failed metadata lookup.
    pub async fn resolve(&self, entity_id: &str) -> DeviceProfile {
        if let Some(profile) = self.cache.read().await.get(entity_id) {
            return profile.clone();
        }

        let metadata = self.fetch_metadata(entity_id).await;
        let profile = classify(entity_id, metadata.as_ref());
        debug!(
            entity_id,
            connection = ?profile.connection,
            split = profile.split_sequencing,
            source = ?profile.source,
            "Resolved device profile"
        );

        self.cache
            .write()
            .await
            .entry(entity_id.to_string())
            .or_insert(profile)
            .clone()
    }

    async fn fetch_metadata(&self, entity_id: &str) -> Option<DeviceMetadata> {
        let template = metadata_template(entity_id);
        let rendered = match self.api.render_template(&template, self.lookup_timeout).await {
            Ok(CallOutcome::Completed(rendered)) => rendered,
            Ok(CallOutcome::TimedOut) => {
                warn!(
                    entity_id,
                    "Device metadata lookup exceeded {:?}", self.lookup_timeout
                );
                return None;
            }
            Err(e) => {
                warn!(entity_id, "Device metadata unavailable: {e}");
                return None;
            }
        };

        match serde_json::from_str::<DeviceMetadata>(rendered.trim()) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(entity_id, "Unreadable device metadata: {e}");
                None
            }
        }
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Classify a device from its metadata, or from its entity id alone
pub fn classify(entity_id: &str, metadata: Option<&DeviceMetadata>) -> DeviceProfile {
    let Some(metadata) = metadata else {
        return DeviceProfile {
            entity_id: entity_id.to_string(),
            manufacturer: None,
            model: None,
            integration: None,
            connection: ConnectionMedium::Unknown,
            split_sequencing: SPLIT_VENDOR.is_match(entity_id),
            source: ProfileSource::EntityId,
        };
    };

    let vendor_text = format!(
        "{} {}",
        metadata.manufacturer.as_deref().unwrap_or_default(),
        metadata.model.as_deref().unwrap_or_default()
    );
    let has_registry_entry = metadata.manufacturer.is_some() || metadata.model.is_some();
    let split_sequencing = if has_registry_entry {
        SPLIT_VENDOR.is_match(&vendor_text)
    } else {
        SPLIT_VENDOR.is_match(entity_id)
    };

    DeviceProfile {
        entity_id: entity_id.to_string(),
        manufacturer: metadata.manufacturer.clone(),
        model: metadata.model.clone(),
        integration: metadata.integration.clone(),
        connection: connection_medium(
            metadata.integration.as_deref(),
            metadata.identifier.as_deref(),
        ),
        split_sequencing,
        source: if has_registry_entry {
            ProfileSource::Metadata
        } else {
            ProfileSource::EntityId
        },
    }
}

fn connection_medium(integration: Option<&str>, identifier: Option<&str>) -> ConnectionMedium {
    let Some(integration) = integration else {
        return ConnectionMedium::Unknown;
    };
    match integration.to_lowercase().as_str() {
        "zha" | "deconz" | "tradfri" | "hue" | "zigbee2mqtt" => ConnectionMedium::Zigbee,
        "mqtt"
            if identifier
                .map(|id| id.to_lowercase().contains("zigbee"))
                .unwrap_or(false) =>
        {
            ConnectionMedium::Zigbee
        }
        "zwave_js" | "zwave" => ConnectionMedium::Zwave,
        "matter" | "thread" | "homekit_controller" => ConnectionMedium::Thread,
        "esphome" | "wled" | "tplink" | "tuya" | "shelly" | "lifx" | "yeelight" | "govee"
        | "wiz" | "nanoleaf" => ConnectionMedium::Wifi,
        "bluetooth" | "switchbot" | "led_ble" | "govee_ble" => ConnectionMedium::Bluetooth,
        _ => ConnectionMedium::Unknown,
    }
}
