//! Common test utilities

pub mod hass_mock;

use hass_scenes_mcp::config::HassConfig;
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token-123";

/// Client settings pointing at a mock server, with fast retries
pub fn test_hass_config(base_url: &str) -> HassConfig {
    HassConfig {
        url: base_url.parse().expect("mock server URL"),
        token: TEST_TOKEN.to_string(),
        timeout: Duration::from_secs(5),
        max_retries: 3,
        retry_base_delay: Duration::from_millis(10),
        verify_ssl: true,
    }
}
