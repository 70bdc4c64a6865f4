//! WireMock-based Home Assistant API mocking
//!
//! Serves the REST endpoints the scene engine uses so the HTTP transport can
//! be tested without a controller.

use serde_json::{json, Value};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::TEST_TOKEN;

/// Mock Home Assistant server
pub struct MockHassServer {
    pub server: MockServer,
    pub base_url: String,
}

impl MockHassServer {
    /// Start a server answering `GET /api/` for the test token
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        let mock_server = Self { server, base_url };
        mock_server.mock_api_root().await;
        mock_server
    }

    async fn mock_api_root(&self) {
        Mock::given(method("GET"))
            .and(path("/api/"))
            .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "API running."
            })))
            .mount(&self.server)
            .await;
    }

    /// Serve `GET /api/states`
    pub async fn mock_states(&self, states: Value) {
        Mock::given(method("GET"))
            .and(path("/api/states"))
            .respond_with(ResponseTemplate::new(200).set_body_json(states))
            .mount(&self.server)
            .await;
    }

    /// Answer `GET /api/states` with `status` for the first `times` requests
    pub async fn mock_states_failure(&self, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path("/api/states"))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_scene_config(&self, scene_id: &str, config: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/api/config/scene/config/{scene_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(config))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_scene_missing(&self, scene_id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/api/config/scene/config/{scene_id}")))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Resource not found"
            })))
            .mount(&self.server)
            .await;
    }

    /// Expect exactly `times` scene upserts whose body contains `partial`
    pub async fn expect_scene_upsert(&self, scene_id: &str, partial: Value, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/api/config/scene/config/{scene_id}")))
            .and(body_partial_json(partial))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Expect exactly `times` `light.<service>` calls whose body contains `partial`
    pub async fn expect_light_service(&self, service: &str, partial: Value, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/api/services/light/{service}")))
            .and(body_partial_json(partial))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Answer template renders with the given device metadata
    pub async fn mock_template(&self, metadata: Value) {
        Mock::given(method("POST"))
            .and(path("/api/template"))
            .respond_with(ResponseTemplate::new(200).set_body_string(metadata.to_string()))
            .mount(&self.server)
            .await;
    }
}

/// A light state record as returned by `/api/states`
pub fn light_record(entity_id: &str, state: &str, attributes: Value) -> Value {
    json!({
        "entity_id": entity_id,
        "state": state,
        "attributes": attributes,
        "last_changed": "2024-01-01T12:00:00+00:00",
        "last_updated": "2024-01-01T12:00:00+00:00"
    })
}
