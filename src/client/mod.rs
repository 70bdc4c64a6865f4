//! Home Assistant client: raw transport, wire records, and the typed API
//!
//! The transport is a single fallible request primitive that returns status
//! codes; retry, timeout and status classification live in [`api::HassApi`].

pub mod api;
pub mod http_client;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use api::HassApi;
pub use http_client::HassHttpClient;

/// HTTP method of an API request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single request against the controller's REST API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `api/states`
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Raw response: status code plus body text
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request primitive beneath the API layer.
///
/// Implementations return `Ok` for every response that arrived (whatever its
/// status) and `Err(HassError::Connection)` for transport-level failures.
#[async_trait]
pub trait HassTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse>;
}

/// Device-state record as returned by `GET /api/states`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateRecord {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl StateRecord {
    /// Entity domain (`light`, `scene`, ...)
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or_default()
    }
}

/// Scene-configuration record as stored by the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SceneConfigRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Service data for `light.turn_on`; absent fields are never serialized
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LightCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u8; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp_kelvin: Option<u32>,
    /// Legacy colour temperature in mireds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

impl LightCommand {
    /// True when the command carries no attributes ("just turn on")
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn has_color(&self) -> bool {
        self.rgb_color.is_some()
            || self.color_temp_kelvin.is_some()
            || self.color_temp.is_some()
            || self.hs_color.is_some()
            || self.xy_color.is_some()
    }
}
