//! MCP message types
//!
//! JSON-RPC 2.0 envelopes as they appear on the server's stdio, plus the
//! MCP payloads the client understands (handshake, tool listing, tool
//! results). See: https://modelcontextprotocol.io/specification

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision announced in the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// === Base Protocol Messages ===

/// Outbound JSON-RPC message (request when `id` is set, notification otherwise)
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage<'a> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: &'a str,
    pub params: &'a Value,
}

/// Identifier carried by an inbound message
///
/// Outbound ids are always integers, but a server may answer with a string or
/// null id (e.g. a parse error response), so inbound ids keep their JSON kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl RequestId {
    /// Parse a JSON id; floats, booleans, arrays and objects are not ids
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Null => Some(RequestId::Null),
            _ => None,
        }
    }

    /// Whether this id answers the outbound request `id`
    pub fn matches(&self, id: i64) -> bool {
        matches!(self, RequestId::Number(n) if *n == id)
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::from(s.clone()),
            RequestId::Null => Value::Null,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
            RequestId::Null => f.write_str("null"),
        }
    }
}

/// Error object of a JSON-RPC error response
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// Lenient decoding: servers do not always send a well-formed error object
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let code = map.get("code").and_then(Value::as_i64);
                let message = match map.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => Value::Object(map.clone()).to_string(),
                };
                Self {
                    code,
                    message,
                    data: map.remove("data"),
                }
            }
            Value::String(message) => Self {
                code: None,
                message,
                data: None,
            },
            other => Self {
                code: None,
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Response to a request sent by this client
#[derive(Debug, Clone)]
pub struct Response {
    pub id: RequestId,
    pub outcome: std::result::Result<Value, RpcError>,
}

impl Response {
    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        self.outcome
    }
}

/// Request initiated by the server
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

/// Notification from the server
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// One decoded line from the server's stdout
#[derive(Debug, Clone)]
pub enum Envelope {
    Request(ServerRequest),
    Response(Response),
    Notification(Notification),
    /// Anything that is not a JSON-RPC object; kept raw for logging only
    Unparseable(String),
}

// === Handshake ===

/// Initialize request parameters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: Implementation,
}

/// Name and version of a protocol participant
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Initialize result (only the fields the harness reports)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<Implementation>,
    #[serde(default)]
    pub capabilities: Value,
}

// === Tools ===

/// Entry of a `tools/list` result
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// `tools/list` result body
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}

/// `tools/call` parameters
#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams<'a> {
    pub name: &'a str,
    pub arguments: &'a Value,
}

/// One part of a tool result
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    Image {
        /// Base64-encoded image bytes
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(
            default,
            rename = "mimeType",
            skip_serializing_if = "Option::is_none"
        )]
        mime_type: Option<String>,
    },
    /// Audio, resources and future part types; ignored by extraction
    #[serde(other)]
    Other,
}

/// `tools/call` result body
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    /// Set by the server when the tool ran but failed
    #[serde(default)]
    pub is_error: bool,
}
