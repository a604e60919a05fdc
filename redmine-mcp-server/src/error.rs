//! Error types and handling for the Redmine MCP Server
//!
//! Provides structured error types that map to MCP JSON-RPC error codes
//! and converts various error types from dependencies into MCP-compatible errors.

use serde_json::Value;
use thiserror::Error;

/// Custom error types for the Redmine MCP Server
#[derive(Debug, Error)]
pub enum RedmineMcpError {
    /// Configuration errors (-32001)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Login marker absent, bad credentials or expired session (-32002)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Network errors (-32003)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Permission denied errors (-32004)
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// Resource not found errors (-32005)
    #[error("Not found: {resource} '{key}' not found")]
    NotFound { resource: String, key: String },

    /// Invalid parameter errors (-32006)
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Field validation failed before anything was submitted (-32006)
    #[error("Field validation failed: {message}")]
    Validation { message: String },

    /// Form was posted but the server rendered the input form again (-32008)
    #[error("Submission failed: {message}")]
    Submission { message: String },

    /// The browser session is unusable; the caller must build a new one (-32009)
    #[error("Session error: {message}")]
    Session { message: String },

    /// Internal server errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RedmineMcpError {
    /// Get the MCP JSON-RPC error code for this error
    pub fn error_code(&self) -> i32 {
        match self {
            RedmineMcpError::Configuration { .. } => -32001,
            RedmineMcpError::Authentication { .. } => -32002,
            RedmineMcpError::Network { .. } => -32003,
            RedmineMcpError::Permission { .. } => -32004,
            RedmineMcpError::NotFound { .. } => -32005,
            RedmineMcpError::InvalidParameter { .. } => -32006,
            RedmineMcpError::Validation { .. } => -32006, // Invalid parameter category
            RedmineMcpError::Submission { .. } => -32008,
            RedmineMcpError::Session { .. } => -32009,
            RedmineMcpError::Internal { .. } => -32603, // Internal error
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RedmineMcpError::Configuration { .. } => "configuration",
            RedmineMcpError::Authentication { .. } => "authentication",
            RedmineMcpError::Network { .. } => "network",
            RedmineMcpError::Permission { .. } => "permission",
            RedmineMcpError::NotFound { .. } => "not_found",
            RedmineMcpError::InvalidParameter { .. } => "invalid_parameter",
            RedmineMcpError::Validation { .. } => "validation",
            RedmineMcpError::Submission { .. } => "submission",
            RedmineMcpError::Session { .. } => "session",
            RedmineMcpError::Internal { .. } => "internal",
        }
    }

    /// Whether the error must abort the call chain instead of being reported
    /// as a `{success: false}` tool result
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedmineMcpError::Session { .. })
    }

    /// Get additional error data for MCP error responses
    pub fn error_data(&self) -> Option<Value> {
        let mut data = serde_json::Map::new();
        data.insert(
            "category".to_string(),
            Value::String(self.category().to_string()),
        );

        match self {
            RedmineMcpError::NotFound { resource, key } => {
                data.insert("resource".to_string(), Value::String(resource.clone()));
                data.insert("key".to_string(), Value::String(key.clone()));
            }
            RedmineMcpError::InvalidParameter { parameter, .. } => {
                data.insert("parameter".to_string(), Value::String(parameter.clone()));
            }
            _ => {}
        }

        Some(Value::Object(data))
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        RedmineMcpError::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        RedmineMcpError::Authentication {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        RedmineMcpError::Network {
            message: message.into(),
        }
    }

    /// Create a permission error
    pub fn permission(message: impl Into<String>) -> Self {
        RedmineMcpError::Permission {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>, key: impl Into<String>) -> Self {
        RedmineMcpError::NotFound {
            resource: resource.into(),
            key: key.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        RedmineMcpError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        RedmineMcpError::Validation {
            message: message.into(),
        }
    }

    /// Create a submission error
    pub fn submission(message: impl Into<String>) -> Self {
        RedmineMcpError::Submission {
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        RedmineMcpError::Session {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        RedmineMcpError::Internal {
            message: message.into(),
        }
    }

    /// Error returned when an operation runs without a logged-in session
    pub fn not_authenticated() -> Self {
        RedmineMcpError::auth("Not authenticated. Please login first.")
    }

    /// Error returned when a navigation bounced back to the login page
    pub fn session_expired() -> Self {
        RedmineMcpError::auth("Session expired. Please login again.")
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for RedmineMcpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            RedmineMcpError::session(format!("HTTP client unusable: {}", err))
        } else if err.is_timeout() {
            RedmineMcpError::network(format!("Request timed out: {}", err))
        } else if err.is_redirect() {
            RedmineMcpError::session(format!("Unexpected navigation: {}", err))
        } else {
            RedmineMcpError::network(format!("HTTP error: {}", err))
        }
    }
}

/// Convert from URL parsing errors
impl From<url::ParseError> for RedmineMcpError {
    fn from(err: url::ParseError) -> Self {
        RedmineMcpError::invalid_param("url", format!("Invalid URL: {}", err))
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for RedmineMcpError {
    fn from(err: serde_json::Error) -> Self {
        RedmineMcpError::internal(format!("JSON error: {}", err))
    }
}

/// Convert from TOML parsing errors
impl From<toml::de::Error> for RedmineMcpError {
    fn from(err: toml::de::Error) -> Self {
        RedmineMcpError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from generic anyhow errors
impl From<anyhow::Error> for RedmineMcpError {
    fn from(err: anyhow::Error) -> Self {
        // Try to determine the category based on the error message
        let message = err.to_string();
        let lower_message = message.to_lowercase();

        if lower_message.contains("authentication") || lower_message.contains("login") {
            RedmineMcpError::auth(message)
        } else if lower_message.contains("not found") || lower_message.contains("404") {
            RedmineMcpError::not_found("resource", "unknown")
        } else if lower_message.contains("permission")
            || lower_message.contains("forbidden")
            || lower_message.contains("403")
        {
            RedmineMcpError::permission(message)
        } else if lower_message.contains("network")
            || lower_message.contains("connection")
            || lower_message.contains("timeout")
        {
            RedmineMcpError::network(message)
        } else if lower_message.contains("config") {
            RedmineMcpError::config(message)
        } else {
            RedmineMcpError::internal(message)
        }
    }
}

/// Result type alias for Redmine MCP operations
pub type RedmineMcpResult<T> = Result<T, RedmineMcpError>;
