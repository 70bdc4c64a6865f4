//! Logging setup and tool-call logging helpers
//!
//! Logs always go to stderr (stdout is reserved for tool output) and can be
//! mirrored into a daily-rotated file.

use crate::config::LoggingConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level
    pub level: Level,

    /// Log to file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
        }
    }
}

impl LogConfig {
    /// Create config from the settings file section, then the environment
    pub fn from_settings(settings: &LoggingConfig) -> Self {
        let mut config = Self {
            level: parse_level(&settings.level).unwrap_or(Level::INFO),
            file_path: settings.file.as_ref().map(PathBuf::from),
            stderr: true,
            json: settings.json_format,
        };
        config.apply_env();
        config
    }

    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            if let Some(level) = parse_level(&rust_log) {
                self.level = level;
            }
        }

        if let Ok(log_file) = std::env::var("HASS_MCP_LOG_FILE") {
            self.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(log_stderr) = std::env::var("HASS_MCP_LOG_STDERR") {
            self.stderr = log_stderr.to_lowercase() != "false";
        }
    }
}

fn parse_level(value: &str) -> Option<Level> {
    let value = value.to_lowercase();
    if value.contains("trace") {
        Some(Level::TRACE)
    } else if value.contains("debug") {
        Some(Level::DEBUG)
    } else if value.contains("info") {
        Some(Level::INFO)
    } else if value.contains("warn") {
        Some(Level::WARN)
    } else if value.contains("error") {
        Some(Level::ERROR)
    } else {
        None
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.stderr {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        if config.json {
            layers.push(layer.json().boxed());
        } else {
            layers.push(layer.compact().boxed());
        }
    }

    if let Some(file_path) = config.file_path {
        let directory = file_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&directory)?;

        let file_name = file_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "hass-scenes-mcp.log".into());
        let appender = tracing_appender::rolling::daily(directory, file_name);

        let layer = fmt::layer().with_writer(appender).with_ansi(false);
        if config.json {
            layers.push(layer.json().boxed());
        } else {
            layers.push(layer.boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Logging helpers for tool invocations
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Log tool invocation
    pub fn log_tool_call(tool_name: &str, params: &serde_json::Value) {
        let sanitized_params = Self::sanitize_params(params);

        tracing::info!(
            tool = tool_name,
            params = %sanitized_params,
            "Tool called"
        );
    }

    /// Log tool completion
    pub fn log_tool_response(tool_name: &str, duration_ms: u64, success: bool) {
        if success {
            tracing::info!(tool = tool_name, duration_ms, "Tool completed");
        } else {
            tracing::warn!(tool = tool_name, duration_ms, "Tool failed");
        }
    }

    /// Replace sensitive values before they reach the log
    fn sanitize_params(params: &serde_json::Value) -> serde_json::Value {
        match params {
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        if Self::is_sensitive_field(key) {
                            (key.clone(), serde_json::Value::String("***".to_string()))
                        } else {
                            (key.clone(), Self::sanitize_params(value))
                        }
                    })
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Self::sanitize_params).collect())
            }
            _ => params.clone(),
        }
    }

    fn is_sensitive_field(field: &str) -> bool {
        let field_lower = field.to_lowercase();
        field_lower.contains("token")
            || field_lower.contains("password")
            || field_lower.contains("secret")
            || field_lower.contains("auth")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sensitive_fields() {
        let params = serde_json::json!({
            "scene_id": "movie_night",
            "token": "eyJhbGciOi",
            "nested": { "Authorization": "Bearer x" }
        });

        let sanitized = LoggingMiddleware::sanitize_params(&params);

        assert_eq!(sanitized["scene_id"], "movie_night");
        assert_eq!(sanitized["token"], "***");
        assert_eq!(sanitized["nested"]["Authorization"], "***");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("hass_scenes_mcp=debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }
}
