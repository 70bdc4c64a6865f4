//! Typed Home Assistant API on top of a [`HassTransport`]
//!
//! Every call goes through the retry executor. Status codes are classified
//! here: 5xx is transient, 401/403 is a credential problem, 404 is a missing
//! item and any other 4xx is a rejected request that is never retried.

use crate::client::{
    ApiRequest, HassHttpClient, HassTransport, LightCommand, RawResponse, SceneConfigRecord,
    StateRecord,
};
use crate::config::HassConfig;
use crate::devices::LightState;
use crate::error::{HassError, Result};
use crate::error_recovery::{CallOutcome, RetryExecutor, RetryPolicy, RetryStats};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Home Assistant REST API client
pub struct HassApi {
    transport: Arc<dyn HassTransport>,
    executor: RetryExecutor,
}

impl HassApi {
    pub fn new(transport: Arc<dyn HassTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            executor: RetryExecutor::new(policy),
        }
    }

    /// Build an API client backed by the HTTP transport
    pub fn from_config(config: &HassConfig) -> Result<Self> {
        let transport = Arc::new(HassHttpClient::new(config)?);
        Ok(Self::new(
            transport,
            RetryPolicy::new(config.max_retries, config.retry_base_delay),
        ))
    }

    /// Retry statistics for all calls made through this client
    pub async fn retry_stats(&self) -> RetryStats {
        self.executor.get_stats().await
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<String> {
        let response = self.transport.send(request).await?;
        classify_response(request, response)
    }

    /// Send a request with retries and return the body text
    pub async fn request_text(&self, request: ApiRequest) -> Result<String> {
        self.executor.execute(|| self.attempt(&request)).await
    }

    /// Send a request with retries and decode the JSON body
    pub async fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let body = self.request_text(request).await?;
        parse_body(&body)
    }

    /// Send a request with retries inside an overall time bound
    pub async fn request_bounded(
        &self,
        request: ApiRequest,
        timeout: Duration,
    ) -> Result<CallOutcome<Value>> {
        let outcome = self
            .executor
            .execute_with_timeout(timeout, || self.attempt(&request))
            .await?;
        match outcome {
            CallOutcome::Completed(body) => Ok(CallOutcome::Completed(parse_body(&body)?)),
            CallOutcome::TimedOut => Ok(CallOutcome::TimedOut),
        }
    }

    /// `GET /api/` - reachability and credential check
    pub async fn check_api(&self) -> Result<Value> {
        self.request_json(ApiRequest::get("api/")).await
    }

    /// All entity states
    pub async fn get_states(&self) -> Result<Vec<StateRecord>> {
        self.request_json(ApiRequest::get("api/states")).await
    }

    /// All light entities with their parsed state
    pub async fn get_lights(&self) -> Result<Vec<LightState>> {
        let states = self.get_states().await?;
        Ok(states.iter().filter_map(LightState::from_record).collect())
    }

    /// Stored scene configuration, `None` when the controller has none
    pub async fn get_scene_config(&self, scene_id: &str) -> Result<Option<SceneConfigRecord>> {
        let path = format!("api/config/scene/config/{}", urlencoding::encode(scene_id));
        match self.request_json::<SceneConfigRecord>(ApiRequest::get(path)).await {
            Ok(mut record) => {
                if record.id.is_empty() {
                    record.id = scene_id.to_string();
                }
                Ok(Some(record))
            }
            Err(HassError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or replace a scene configuration
    pub async fn upsert_scene_config(&self, record: &SceneConfigRecord) -> Result<()> {
        let path = format!("api/config/scene/config/{}", urlencoding::encode(&record.id));
        let body = serde_json::to_value(record)?;
        self.request_text(ApiRequest::post(path, body)).await?;
        debug!("Stored scene configuration {}", record.id);
        Ok(())
    }

    /// Delete a scene configuration; `false` when it did not exist
    pub async fn delete_scene_config(&self, scene_id: &str) -> Result<bool> {
        let path = format!("api/config/scene/config/{}", urlencoding::encode(scene_id));
        match self.request_text(ApiRequest::delete(path)).await {
            Ok(_) => Ok(true),
            Err(HassError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `light.turn_on` for one entity
    pub async fn turn_on(
        &self,
        entity_id: &str,
        command: &LightCommand,
        timeout: Duration,
    ) -> Result<CallOutcome<Value>> {
        let mut body = serde_json::to_value(command)?;
        if let Value::Object(map) = &mut body {
            map.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
        }
        self.request_bounded(ApiRequest::post("api/services/light/turn_on", body), timeout)
            .await
    }

    /// `light.turn_off` for one or more entities in a single call
    pub async fn turn_off(
        &self,
        entity_ids: &[String],
        timeout: Duration,
    ) -> Result<CallOutcome<Value>> {
        let body = json!({ "entity_id": entity_ids });
        self.request_bounded(ApiRequest::post("api/services/light/turn_off", body), timeout)
            .await
    }

    /// `scene.turn_on` for a scene entity, leaving execution to the controller
    pub async fn activate_scene_entity(
        &self,
        scene_entity_id: &str,
        timeout: Duration,
    ) -> Result<CallOutcome<Value>> {
        let body = json!({ "entity_id": scene_entity_id });
        self.request_bounded(ApiRequest::post("api/services/scene/turn_on", body), timeout)
            .await
    }

    /// Render a template on the controller within `timeout`
    pub async fn render_template(
        &self,
        template: &str,
        timeout: Duration,
    ) -> Result<CallOutcome<String>> {
        let request = ApiRequest::post("api/template", json!({ "template": template }));
        self.executor
            .execute_with_timeout(timeout, || self.attempt(&request))
            .await
    }
}

fn classify_response(request: &ApiRequest, response: RawResponse) -> Result<String> {
    if response.is_success() {
        return Ok(response.body);
    }

    let target = format!("{} {}", request.method, request.path);
    let body = response.body.trim();
    match response.status {
        401 | 403 => Err(HassError::authentication(format!(
            "Access token rejected by Home Assistant ({}) for {target}",
            response.status
        ))),
        404 => Err(HassError::not_found(target)),
        400..=499 => Err(HassError::invalid_input(format!(
            "Home Assistant rejected {target} ({}): {body}",
            response.status
        ))),
        _ => Err(HassError::service_unavailable(format!(
            "Home Assistant returned {} for {target}: {body}",
            response.status
        ))),
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    serde_json::from_str(body)
        .map_err(|e| HassError::parsing_error(format!("Unexpected response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHassTransport;

    fn api(mock: &Arc<MockHassTransport>) -> HassApi {
        HassApi::new(mock.clone(), RetryPolicy::new(3, Duration::from_millis(100)))
    }

    #[test]
    fn test_status_classification() {
        let req = ApiRequest::get("api/states");
        assert!(classify_response(&req, RawResponse::new(200, "[]")).is_ok());
        assert!(matches!(
            classify_response(&req, RawResponse::new(401, "")),
            Err(HassError::Authentication(_))
        ));
        assert!(matches!(
            classify_response(&req, RawResponse::new(404, "")),
            Err(HassError::NotFound(_))
        ));
        assert!(matches!(
            classify_response(&req, RawResponse::new(422, "bad")),
            Err(HassError::InvalidInput(_))
        ));
        assert!(matches!(
            classify_response(&req, RawResponse::new(502, "")),
            Err(HassError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried() {
        let mock = Arc::new(MockHassTransport::new());
        mock.add_light("light.desk", true);
        mock.fail_next("api/states", 503, 2);

        let lights = api(&mock).get_lights().await.unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(mock.request_count("api/states"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_scene_is_none() {
        let mock = Arc::new(MockHassTransport::new());
        let record = api(&mock).get_scene_config("nope").await.unwrap();
        assert!(record.is_none());
        assert!(!api(&mock).delete_scene_config("nope").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_body_includes_entity() {
        let mock = Arc::new(MockHassTransport::new());
        mock.add_light("light.desk", false);
        let command = LightCommand {
            brightness: Some(128),
            ..Default::default()
        };

        let outcome = api(&mock)
            .turn_on("light.desk", &command, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!outcome.is_timed_out());

        let calls = mock.service_calls("light", "turn_on");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["entity_id"], "light.desk");
        assert_eq!(calls[0]["brightness"], 128);
        assert!(calls[0].get("rgb_color").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_command_times_out() {
        let mock = Arc::new(MockHassTransport::new());
        mock.add_light("light.slow", false);
        mock.delay_entity("light.slow", Duration::from_secs(30));

        let outcome = api(&mock)
            .turn_on("light.slow", &LightCommand::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.is_timed_out());
    }
}
