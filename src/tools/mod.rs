//! Tool implementations for scene and light control
//!
//! Tools are plain async functions taking a [`ToolContext`] and returning a
//! [`ToolResponse`]; schema declaration and transport binding live with the
//! caller.

pub mod lighting;
pub mod scenes;

use crate::error::{ErrorReporter, HassError, Result};
use crate::logging::LoggingMiddleware;
use crate::scenes::SceneEngine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Standard tool response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Status of the operation
    pub status: String,

    /// Response data
    pub data: serde_json::Value,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ToolResponse {
    /// Create successful response
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            status: "success".to_string(),
            data,
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create successful response with message
    pub fn success_with_message(data: serde_json::Value, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::success(data)
        }
    }

    /// Create error response
    pub fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            data: serde_json::Value::Null,
            message: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Error response carrying the structured error body
    pub fn from_error(error: &HassError) -> Self {
        if let HassError::NotFound(what) = error {
            return Self::not_found(what, None);
        }
        Self {
            data: ErrorReporter::format_api_error(error),
            ..Self::error(error.sanitized_message())
        }
    }

    /// Create response from Result
    pub fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(data) => match serde_json::to_value(data) {
                Ok(json_data) => Self::success(json_data),
                Err(e) => Self::error(format!("Failed to encode response: {e}")),
            },
            Err(e) => Self::from_error(&e),
        }
    }

    /// Create not found response
    pub fn not_found(identifier: &str, suggestion: Option<&str>) -> Self {
        Self {
            status: "not_found".to_string(),
            data: serde_json::json!({
                "requested": identifier,
                "found": false,
                "suggestion": suggestion.unwrap_or("Use list_scenes or list_lights to see what exists")
            }),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Shared tool context
#[derive(Clone)]
pub struct ToolContext {
    pub engine: Arc<SceneEngine>,
}

impl ToolContext {
    pub fn new(engine: Arc<SceneEngine>) -> Self {
        Self { engine }
    }
}

/// Run one tool body with call/response logging
pub(crate) async fn run_tool<T, Fut>(
    tool_name: &str,
    params: serde_json::Value,
    body: Fut,
) -> ToolResponse
where
    T: Serialize,
    Fut: Future<Output = Result<T>>,
{
    LoggingMiddleware::log_tool_call(tool_name, &params);
    let started = Instant::now();

    let result = body.await;
    if let Err(e) = &result {
        if !e.is_not_found() {
            ErrorReporter::log_error(e, "tools", tool_name);
        }
    }

    let response = ToolResponse::from_result(result);
    LoggingMiddleware::log_tool_response(
        tool_name,
        started.elapsed().as_millis() as u64,
        response.status != "error",
    );
    response
}
