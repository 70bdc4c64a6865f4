//! Scripted in-memory Home Assistant for tests
//!
//! [`MockHassTransport`] answers the REST endpoints the engine uses from an
//! in-memory state table, applies light service calls to it, and records
//! every request with the (tokio) time it arrived. Failures, slow devices and
//! devices that ignore commands can be scripted per path or per entity.

use crate::client::{ApiRequest, HassTransport, HttpMethod, RawResponse, StateRecord};
use crate::devices::LightState;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const SCENE_CONFIG_PREFIX: &str = "api/config/scene/config/";

/// One request as received by the mock
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub at: Instant,
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    states: BTreeMap<String, StateRecord>,
    scene_configs: BTreeMap<String, Value>,
    device_metadata: HashMap<String, Value>,
    /// Path -> statuses to answer with before serving normally
    failures: HashMap<String, VecDeque<u16>>,
    entity_delays: HashMap<String, Duration>,
    path_delays: HashMap<String, Duration>,
    rejected_entities: HashMap<String, u16>,
    ignoring_entities: BTreeSet<String>,
    requests: Vec<LoggedRequest>,
}

/// In-memory Home Assistant implementing [`HassTransport`]
#[derive(Default)]
pub struct MockHassTransport {
    state: Mutex<MockState>,
}

impl MockHassTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Add a light with no attributes beyond its power state
    pub fn add_light(&self, entity_id: &str, on: bool) {
        self.add_light_with(entity_id, on, json!({}));
    }

    /// Add a light with explicit attributes
    pub fn add_light_with(&self, entity_id: &str, on: bool, attributes: Value) {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.inner().states.insert(
            entity_id.to_string(),
            StateRecord {
                entity_id: entity_id.to_string(),
                state: if on { "on" } else { "off" }.to_string(),
                attributes,
            },
        );
    }

    /// Add a scene entity pointing at a stored scene configuration
    pub fn add_scene_entity(&self, entity_id: &str, config_id: &str) {
        let mut attributes = Map::new();
        attributes.insert("id".to_string(), Value::String(config_id.to_string()));
        self.inner().states.insert(
            entity_id.to_string(),
            StateRecord {
                entity_id: entity_id.to_string(),
                state: "unknown".to_string(),
                attributes,
            },
        );
    }

    /// Drop an entity from the state list, as when a device goes unavailable
    pub fn remove_entity(&self, entity_id: &str) {
        self.inner().states.remove(entity_id);
    }

    /// Change a light's power state without going through a service call
    pub fn set_light_on(&self, entity_id: &str, on: bool) {
        if let Some(record) = self.inner().states.get_mut(entity_id) {
            record.state = if on { "on" } else { "off" }.to_string();
        }
    }

    pub fn set_device_metadata(
        &self,
        entity_id: &str,
        manufacturer: &str,
        model: &str,
        integration: &str,
    ) {
        self.inner().device_metadata.insert(
            entity_id.to_string(),
            json!({
                "manufacturer": manufacturer,
                "model": model,
                "integration": integration,
                "identifier": format!("{integration}-{entity_id}"),
            }),
        );
    }

    /// Answer the next `count` requests to `path` with `status`
    pub fn fail_next(&self, path: &str, status: u16, count: usize) {
        self.inner()
            .failures
            .entry(path.to_string())
            .or_default()
            .extend(std::iter::repeat(status).take(count));
    }

    /// Hold service calls addressing `entity_id` for `delay` before answering
    pub fn delay_entity(&self, entity_id: &str, delay: Duration) {
        self.inner()
            .entity_delays
            .insert(entity_id.to_string(), delay);
    }

    /// Hold every request to `path` for `delay` before answering
    pub fn delay_path(&self, path: &str, delay: Duration) {
        self.inner().path_delays.insert(path.to_string(), delay);
    }

    /// Answer service calls addressing `entity_id` with `status`
    pub fn reject_entity(&self, entity_id: &str, status: u16) {
        self.inner()
            .rejected_entities
            .insert(entity_id.to_string(), status);
    }

    /// Accept service calls for `entity_id` but never change its state
    pub fn drop_commands_for(&self, entity_id: &str) {
        self.inner().ignoring_entities.insert(entity_id.to_string());
    }

    /// Store a scene configuration as if another writer had saved it
    pub fn put_scene(&self, scene_id: &str, mut config: Value) {
        if let Value::Object(map) = &mut config {
            map.entry("id")
                .or_insert_with(|| Value::String(scene_id.to_string()));
        }
        self.inner()
            .scene_configs
            .insert(scene_id.to_string(), config);
    }

    pub fn remove_scene(&self, scene_id: &str) {
        self.inner().scene_configs.remove(scene_id);
    }

    pub fn scene_config(&self, scene_id: &str) -> Option<Value> {
        self.inner().scene_configs.get(scene_id).cloned()
    }

    pub fn light_states(&self) -> Vec<LightState> {
        self.inner()
            .states
            .values()
            .filter_map(LightState::from_record)
            .collect()
    }

    pub fn light_state(&self, entity_id: &str) -> Option<LightState> {
        self.inner()
            .states
            .get(entity_id)
            .and_then(LightState::from_record)
    }

    /// Entity ids of lights that are on, sorted
    pub fn lights_on(&self) -> Vec<String> {
        self.light_states()
            .into_iter()
            .filter(|light| light.is_on)
            .map(|light| light.entity_id)
            .collect()
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.inner().requests.clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.inner()
            .requests
            .iter()
            .filter(|request| request.path == path)
            .count()
    }

    /// Bodies of the service calls received for `domain.service`
    pub fn service_calls(&self, domain: &str, service: &str) -> Vec<Value> {
        self.timed_service_calls(domain, service)
            .into_iter()
            .map(|(_, body)| body)
            .collect()
    }

    /// Service call bodies with their arrival times
    pub fn timed_service_calls(&self, domain: &str, service: &str) -> Vec<(Instant, Value)> {
        let path = format!("api/services/{domain}/{service}");
        self.inner()
            .requests
            .iter()
            .filter(|request| request.path == path)
            .map(|request| (request.at, request.body.clone().unwrap_or(Value::Null)))
            .collect()
    }

    fn handle(&self, request: &ApiRequest) -> RawResponse {
        let mut state = self.inner();

        if let Some(status) = state
            .failures
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front)
        {
            return RawResponse::new(status, "scripted failure");
        }

        let targets = request.body.as_ref().map(target_entities).unwrap_or_default();
        if request.path.starts_with("api/services/") {
            if let Some(status) = targets
                .iter()
                .find_map(|entity_id| state.rejected_entities.get(entity_id).copied())
            {
                return RawResponse::new(status, "entity rejected the command");
            }
        }

        match (request.method, request.path.as_str()) {
            (HttpMethod::Get, "api/") => ok(json!({ "message": "API running." })),
            (HttpMethod::Get, "api/states") => {
                ok(json!(state.states.values().collect::<Vec<_>>()))
            }
            (HttpMethod::Post, "api/services/light/turn_on") => {
                let body = request.body.clone().unwrap_or(Value::Null);
                for entity_id in &targets {
                    if state.ignoring_entities.contains(entity_id) {
                        continue;
                    }
                    if let Some(record) = state.states.get_mut(entity_id) {
                        apply_turn_on(record, &body);
                    }
                }
                ok(json!([]))
            }
            (HttpMethod::Post, "api/services/light/turn_off") => {
                for entity_id in &targets {
                    if state.ignoring_entities.contains(entity_id) {
                        continue;
                    }
                    if let Some(record) = state.states.get_mut(entity_id) {
                        record.state = "off".to_string();
                        record.attributes.remove("brightness");
                    }
                }
                ok(json!([]))
            }
            (HttpMethod::Post, "api/services/scene/turn_on") => ok(json!([])),
            (HttpMethod::Post, "api/template") => {
                let template = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("template"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let metadata = template_entity(template)
                    .and_then(|entity_id| state.device_metadata.get(entity_id).cloned())
                    .unwrap_or_else(|| {
                        json!({
                            "manufacturer": null,
                            "model": null,
                            "integration": null,
                            "identifier": null,
                        })
                    });
                RawResponse::new(200, metadata.to_string())
            }
            (method, path) if path.starts_with(SCENE_CONFIG_PREFIX) => {
                let encoded = &path[SCENE_CONFIG_PREFIX.len()..];
                let scene_id = urlencoding::decode(encoded)
                    .map(|id| id.into_owned())
                    .unwrap_or_else(|_| encoded.to_string());
                match method {
                    HttpMethod::Get => match state.scene_configs.get(&scene_id) {
                        Some(config) => ok(config.clone()),
                        None => not_found(),
                    },
                    HttpMethod::Post => {
                        let mut config = request.body.clone().unwrap_or(Value::Null);
                        if let Value::Object(map) = &mut config {
                            map.insert("id".to_string(), Value::String(scene_id.clone()));
                        }
                        state.scene_configs.insert(scene_id, config);
                        ok(json!({ "result": "ok" }))
                    }
                    HttpMethod::Delete => match state.scene_configs.remove(&scene_id) {
                        Some(_) => ok(json!({ "result": "ok" })),
                        None => not_found(),
                    },
                }
            }
            _ => not_found(),
        }
    }
}

#[async_trait]
impl HassTransport for MockHassTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let delay = {
            let mut state = self.inner();
            state.requests.push(LoggedRequest {
                at: Instant::now(),
                method: request.method,
                path: request.path.clone(),
                body: request.body.clone(),
            });

            let targets = request.body.as_ref().map(target_entities).unwrap_or_default();
            targets
                .iter()
                .filter_map(|entity_id| state.entity_delays.get(entity_id).copied())
                .chain(state.path_delays.get(&request.path).copied())
                .max()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.handle(request))
    }
}

fn ok(body: Value) -> RawResponse {
    RawResponse::new(200, body.to_string())
}

fn not_found() -> RawResponse {
    RawResponse::new(404, json!({ "message": "Resource not found" }).to_string())
}

/// `entity_id` of a service call body, as a string or a list
fn target_entities(body: &Value) -> Vec<String> {
    match body.get("entity_id") {
        Some(Value::String(entity_id)) => vec![entity_id.clone()],
        Some(Value::Array(entity_ids)) => entity_ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Entity a device metadata template was rendered for
fn template_entity(template: &str) -> Option<&str> {
    let start = template.find("set e = '")? + "set e = '".len();
    let len = template[start..].find('\'')?;
    Some(&template[start..start + len])
}

fn apply_turn_on(record: &mut StateRecord, body: &Value) {
    record.state = "on".to_string();
    let Some(body) = body.as_object() else {
        return;
    };

    const COLOR_KEYS: [(&str, &str); 5] = [
        ("rgb_color", "rgb"),
        ("color_temp_kelvin", "color_temp"),
        ("color_temp", "color_temp"),
        ("hs_color", "hs"),
        ("xy_color", "xy"),
    ];
    if let Some((key, mode)) = COLOR_KEYS.iter().find(|(key, _)| body.contains_key(*key)) {
        for (other, _) in COLOR_KEYS {
            record.attributes.remove(other);
        }
        record
            .attributes
            .insert(key.to_string(), body[*key].clone());
        record
            .attributes
            .insert("color_mode".to_string(), Value::String(mode.to_string()));
    }
    for key in ["brightness", "effect"] {
        if let Some(value) = body.get(key) {
            record.attributes.insert(key.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_calls_change_state() {
        let mock = MockHassTransport::new();
        mock.add_light("light.a", false);
        mock.add_light("light.b", true);

        let on = ApiRequest::post(
            "api/services/light/turn_on",
            json!({ "entity_id": "light.a", "brightness": 30, "hs_color": [10.0, 50.0] }),
        );
        assert!(mock.send(&on).await.unwrap().is_success());
        let off = ApiRequest::post(
            "api/services/light/turn_off",
            json!({ "entity_id": ["light.b"] }),
        );
        assert!(mock.send(&off).await.unwrap().is_success());

        let light = mock.light_state("light.a").unwrap();
        assert!(light.is_on);
        assert_eq!(light.brightness, Some(30));
        assert_eq!(mock.lights_on(), vec!["light.a"]);
        assert_eq!(mock.request_count("api/services/light/turn_on"), 1);
    }

    #[tokio::test]
    async fn test_scene_config_lifecycle() {
        let mock = MockHassTransport::new();
        let path = "api/config/scene/config/movie%20night";

        assert_eq!(mock.send(&ApiRequest::get(path)).await.unwrap().status, 404);
        mock.send(&ApiRequest::post(path, json!({ "name": "Movie", "entities": {} })))
            .await
            .unwrap();
        assert_eq!(mock.scene_config("movie night").unwrap()["id"], "movie night");
        assert!(mock.send(&ApiRequest::delete(path)).await.unwrap().is_success());
        assert!(mock.scene_config("movie night").is_none());
    }

    #[test]
    fn test_template_entity_extraction() {
        let template = crate::devices::profile::metadata_template("light.desk");
        assert_eq!(template_entity(&template), Some("light.desk"));
    }
}
