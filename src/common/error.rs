//! Error types for the MCP harness
//!
//! Every failure of the control channel surfaces synchronously to the caller
//! of the operation that triggered it. Nothing here is retried automatically;
//! retry policy belongs to the scenario runner.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the MCP harness
#[derive(Error, Debug)]
pub enum Error {
    // === Transport Errors ===
    #[error("MCP server failed to start: {0}")]
    ServerStartFailed(String),

    #[error("MCP server stream is unavailable (already closed)")]
    TransportUnavailable,

    #[error("Timed out after {}ms waiting for {operation}", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("MCP server exited unexpectedly (code={})", describe_exit(.0))]
    ProcessExited(Option<i32>),

    // === Protocol Errors ===
    #[error("Protocol desynchronized: expected response id {expected}, got {got}")]
    UnexpectedResponseId { expected: i64, got: String },

    #[error("initialize failed: {0}")]
    HandshakeFailed(String),

    #[error("{method} failed: {message}")]
    RequestFailed { method: String, message: String },

    #[error("Tool '{tool}' returned error: {text}")]
    ToolInvocationError { tool: String, text: String },

    // === Content Extraction Errors ===
    #[error("Expected JSON text but got: {snippet}")]
    MalformedPayload { snippet: String },

    #[error("No image content returned")]
    NoImageContent,

    #[error("Image content missing base64 payload")]
    MissingPayload,

    #[error("Screenshot payload is not a valid PNG: {0}")]
    InvalidImageFormat(String),

    // === Scenario Errors ===
    #[error("{0}")]
    Scenario(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl Error {
    /// Create a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a request failed error
    pub fn request_failed(method: &str, message: impl ToString) -> Self {
        Self::RequestFailed {
            method: method.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a malformed payload error, keeping only a prefix of the text
    pub fn malformed_payload(text: &str) -> Self {
        Self::MalformedPayload {
            snippet: text.chars().take(MALFORMED_SNIPPET_CHARS).collect(),
        }
    }

    /// Whether the error means the server can no longer be talked to
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::TransportUnavailable
                | Error::ProcessExited(_)
                | Error::UnexpectedResponseId { .. }
                | Error::ServerStartFailed(_)
        )
    }
}

/// Number of characters of an unparseable payload kept for diagnostics
pub const MALFORMED_SNIPPET_CHARS: usize = 160;
