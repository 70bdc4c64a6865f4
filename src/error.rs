//! Error types for the Home Assistant scene engine
//!
//! This module provides error handling with structured error codes,
//! retry classification, and production-safe logging integration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for scene engine operations
pub type Result<T> = std::result::Result<T, HassError>;

/// Error types for Home Assistant scene and light operations
#[derive(Error, Debug)]
pub enum HassError {
    /// Connection errors (transport failures, refused connections)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authentication errors (token missing or rejected)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local backup storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Invalid input errors, including 4xx rejections from the controller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found errors (scenes, lights, snapshots)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Controller returned a server-side failure
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Parsing errors
    #[error("Parsing error: {0}")]
    Parsing(String),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Connection errors (1000-1099)
    ConnectionLost,

    // Authentication errors (1100-1199)
    InvalidCredentials,

    // Configuration errors (1200-1299)
    ConfigurationInvalid,

    // Device errors (1300-1399)
    DeviceNotFound,

    // Data errors (1400-1499)
    ParsingFailed,
    InvalidInput,

    // Storage errors (1500-1599)
    StorageFailure,

    // Service errors (1600-1699)
    ServiceUnavailable,
    ExternalServiceError,

    // Internal errors (1900-1999)
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::ConnectionLost => 1003,
            ErrorCode::InvalidCredentials => 1101,
            ErrorCode::ConfigurationInvalid => 1202,
            ErrorCode::DeviceNotFound => 1301,
            ErrorCode::ParsingFailed => 1401,
            ErrorCode::InvalidInput => 1402,
            ErrorCode::StorageFailure => 1501,
            ErrorCode::ServiceUnavailable => 1601,
            ErrorCode::ExternalServiceError => 1603,
            ErrorCode::InternalError => 1901,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "connection",
            1100..=1199 => "authentication",
            1200..=1299 => "configuration",
            1300..=1399 => "device",
            1400..=1499 => "data",
            1500..=1599 => "storage",
            1600..=1699 => "service",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

/// Enhanced error representation for logging and tool responses
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub code_number: u32,
    pub category: &'static str,
    /// Production-safe error message
    pub message: String,
    pub is_retryable: bool,
    pub is_auth_error: bool,
    /// Component that generated the error
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    pub severity: ErrorSeverity,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HassError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a parsing error
    pub fn parsing_error<S: Into<String>>(msg: S) -> Self {
        Self::Parsing(msg.into())
    }

    /// Map to structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            HassError::Connection(_) => ErrorCode::ConnectionLost,
            HassError::Authentication(_) => ErrorCode::InvalidCredentials,
            HassError::Config(_) => ErrorCode::ConfigurationInvalid,
            HassError::Storage(_) => ErrorCode::StorageFailure,
            HassError::InvalidInput(_) => ErrorCode::InvalidInput,
            HassError::NotFound(_) => ErrorCode::DeviceNotFound,
            HassError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            HassError::Parsing(_) | HassError::Json(_) => ErrorCode::ParsingFailed,
            HassError::Http(_) => ErrorCode::ExternalServiceError,
            HassError::Io(_) | HassError::Generic(_) => ErrorCode::InternalError,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            HassError::Authentication(_) | HassError::Config(_) => ErrorSeverity::Critical,
            HassError::Connection(_) | HassError::ServiceUnavailable(_) => ErrorSeverity::Warning,
            HassError::InvalidInput(_) | HassError::Parsing(_) => ErrorSeverity::Warning,
            HassError::NotFound(_) => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Transient failures worth another attempt: transport problems and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            HassError::Connection(_) | HassError::ServiceUnavailable(_) => true,
            HassError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }

    /// Check if error indicates an authentication issue
    pub fn is_auth_error(&self) -> bool {
        matches!(self, HassError::Authentication(_))
    }

    /// Check if error means the requested item does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, HassError::NotFound(_))
    }

    /// Get a production-safe error message that doesn't expose sensitive information
    pub fn sanitized_message(&self) -> String {
        #[cfg(debug_assertions)]
        {
            self.to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            match self {
                // Configuration problems are surfaced verbatim so the user can fix them.
                HassError::Config(_) | HassError::NotFound(_) | HassError::InvalidInput(_) => {
                    self.to_string()
                }
                HassError::Authentication(_) => "Authentication failed".to_string(),
                HassError::Connection(_) => "Network connection issue".to_string(),
                HassError::Http(_) => "HTTP request failed".to_string(),
                HassError::Storage(_) => "Local backup storage failed".to_string(),
                HassError::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
                HassError::Parsing(_) | HassError::Json(_) => "Data parsing error".to_string(),
                HassError::Io(_) => "I/O operation failed".to_string(),
                HassError::Generic(_) => "Internal error occurred".to_string(),
            }
        }
    }

    /// Create a structured error for logging and tool responses
    pub fn to_structured_error(&self, component: &str, operation: &str) -> StructuredError {
        let code = self.to_error_code();
        StructuredError {
            code_number: code.as_number(),
            category: code.category(),
            code,
            message: self.sanitized_message(),
            is_retryable: self.is_retryable(),
            is_auth_error: self.is_auth_error(),
            component: component.to_string(),
            operation: operation.to_string(),
            severity: self.severity(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Error logging and reporting utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log a structured error with appropriate severity
    pub fn log_error(error: &HassError, component: &str, operation: &str) {
        let structured = error.to_structured_error(component, operation);

        match structured.severity {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                tracing::error!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "Error occurred: {}",
                    structured.message
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "Warning: {}",
                    structured.message
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "{}",
                    structured.message
                );
            }
        }
    }

    /// Format error for tool responses
    pub fn format_api_error(error: &HassError) -> serde_json::Value {
        let structured = error.to_structured_error("tools", "response");

        serde_json::json!({
            "error": {
                "code": structured.code_number,
                "category": structured.category,
                "message": structured.message,
                "retryable": structured.is_retryable,
                "timestamp": structured.timestamp
            }
        })
    }
}

impl From<regex::Error> for HassError {
    fn from(err: regex::Error) -> Self {
        HassError::InvalidInput(format!("Regex pattern error: {err}"))
    }
}

impl From<toml::de::Error> for HassError {
    fn from(err: toml::de::Error) -> Self {
        HassError::Config(format!("Invalid settings file: {err}"))
    }
}
