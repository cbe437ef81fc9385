//! MCP client session
//!
//! Drives a stdio MCP server through the handshake, tool discovery and tool
//! calls. Calls are single-flight: one request is outstanding at a time and
//! the client reads stdout until the matching response shows up, observing
//! notifications and answering server pings along the way.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::common::config::{ClientIdentity, Config};
use crate::common::{Error, Result};

use super::codec;
use super::content;
use super::diagnostics::DiagnosticLog;
use super::transport::Transport;
use super::types::*;

/// Settings for one client session
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Default deadline for a request
    pub request_timeout: Duration,
    /// Lower bound for the initialize deadline; handshakes are slow
    pub handshake_floor: Duration,
    /// Time between terminate and kill on stop
    pub shutdown_grace: Duration,
    /// Number of server stderr lines kept
    pub diagnostic_capacity: usize,
    /// Identity sent in the handshake
    pub client_info: ClientIdentity,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            handshake_floor: config.handshake_floor(),
            shutdown_grace: config.shutdown_grace(),
            diagnostic_capacity: config.diagnostics.capacity,
            client_info: config.client.clone(),
        }
    }
}

/// Client for one MCP server process
pub struct McpClient {
    transport: Transport,
    /// Id of the next request; ids are never reused
    next_id: AtomicI64,
    options: ClientOptions,
    /// Server handshake result (populated by initialize)
    pub server: Option<InitializeResult>,
}

impl McpClient {
    /// Start the server and create a client for it
    pub fn spawn(command_line: &str, options: ClientOptions) -> Result<Self> {
        let transport = Transport::start(command_line, options.diagnostic_capacity)?;
        Ok(Self {
            transport,
            next_id: AtomicI64::new(1),
            options,
            server: None,
        })
    }

    /// Get the next request id
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and wait for its response
    ///
    /// Returns the response whether it carries a result or an error; the
    /// caller decides what a protocol-level error means for its method.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let id = self.next_id();
        let limit = timeout.unwrap_or(self.options.request_timeout);
        let deadline = deadline_after(limit)?;

        let params = params.unwrap_or_else(|| json!({}));
        let line = codec::encode_request(id, method, &params)?;
        tracing::debug!(id, "MCP >>> {}", truncate_for_log(&line));
        self.transport
            .write_line(&line, deadline)
            .await
            .map_err(|e| with_operation(e, format!("request {}", method), limit))?;

        loop {
            let line = self
                .transport
                .read_line(deadline)
                .await
                .map_err(|e| with_operation(e, format!("response to {}", method), limit))?;

            match codec::decode(&line) {
                Envelope::Response(response) if response.id.matches(id) => {
                    tracing::debug!(id, "MCP <<< {}", truncate_for_log(&line));
                    return Ok(response);
                }
                Envelope::Response(response) => {
                    return Err(Error::UnexpectedResponseId {
                        expected: id,
                        got: response.id.to_string(),
                    });
                }
                Envelope::Notification(notification) => {
                    tracing::debug!(
                        method = %notification.method,
                        "MCP notification: {}",
                        truncate_for_log(&line)
                    );
                }
                Envelope::Request(request) => self
                    .answer_server_request(request, deadline)
                    .await
                    .map_err(|e| with_operation(e, format!("response to {}", method), limit))?,
                Envelope::Unparseable(raw) => {
                    tracing::debug!("Non-JSON line ignored: {}", truncate_for_log(&raw));
                }
            }
        }
    }

    /// Reply to a request initiated by the server
    ///
    /// Only `ping` is supported; everything else is refused so the server
    /// does not wait on us.
    async fn answer_server_request(
        &mut self,
        request: ServerRequest,
        deadline: Instant,
    ) -> Result<()> {
        tracing::debug!(method = %request.method, id = %request.id, "Server request");
        let outcome = if request.method == "ping" {
            Ok(json!({}))
        } else {
            Err(RpcError {
                code: Some(-32601),
                message: format!("Method not found: {}", request.method),
                data: None,
            })
        };
        let line = codec::encode_response(&request.id, outcome)?;
        self.transport.write_line(&line, deadline).await
    }

    /// Send a notification (no response expected)
    ///
    /// The write is bounded by the default request timeout.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let limit = self.options.request_timeout;
        let deadline = deadline_after(limit)?;
        let params = params.unwrap_or_else(|| json!({}));
        let line = codec::encode_notification(method, &params)?;
        tracing::debug!("MCP >>> {}", line);
        self.transport
            .write_line(&line, deadline)
            .await
            .map_err(|e| with_operation(e, format!("notification {}", method), limit))
    }

    /// Perform the initialize handshake and announce readiness
    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: Implementation {
                name: self.options.client_info.name.clone(),
                version: self.options.client_info.version.clone(),
            },
        };
        let timeout = self.options.request_timeout.max(self.options.handshake_floor);

        let response = self
            .request("initialize", Some(serde_json::to_value(&params)?), Some(timeout))
            .await?;
        let result = response
            .into_result()
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

        // Servers differ in what they report; a sparse result is still a handshake
        let info: InitializeResult = match serde_json::from_value(result) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Ignoring malformed initialize result: {}", e);
                InitializeResult::default()
            }
        };
        if let Some(server) = &info.server_info {
            tracing::info!(
                protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
                "Connected to {} {}",
                server.name,
                server.version
            );
        }

        self.notify("notifications/initialized", None).await?;
        self.server = Some(info.clone());
        Ok(info)
    }

    /// List the tools the server exposes
    pub async fn list_tools(&mut self) -> Result<Vec<ToolInfo>> {
        let response = self.request("tools/list", None, None).await?;
        let result = response
            .into_result()
            .map_err(|e| Error::request_failed("tools/list", e))?;
        let list: ListToolsResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    /// Invoke a tool
    ///
    /// A result flagged `isError` by the server fails with
    /// `ToolInvocationError` carrying the result text.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: &Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResult> {
        let params = CallToolParams { name, arguments };
        let response = self
            .request("tools/call", Some(serde_json::to_value(&params)?), timeout)
            .await?;
        let result = response
            .into_result()
            .map_err(|e| Error::request_failed(&format!("tools/call {}", name), e))?;

        let result: ToolResult = serde_json::from_value(result)?;
        if result.is_error {
            return Err(Error::ToolInvocationError {
                tool: name.to_string(),
                text: content::text_of(&result.content),
            });
        }
        Ok(result)
    }

    /// Invoke a tool and return its text
    pub async fn call_tool_text(
        &mut self,
        name: &str,
        arguments: &Value,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let result = self.call_tool(name, arguments, timeout).await?;
        Ok(content::text_of(&result.content))
    }

    /// Buffered server stderr
    pub fn diagnostics(&self) -> &DiagnosticLog {
        self.transport.diagnostics()
    }

    /// Buffered server stderr as one string
    pub fn diagnostic_tail(&self) -> String {
        self.transport.diagnostics().tail_text()
    }

    /// Default request deadline
    pub fn request_timeout(&self) -> Duration {
        self.options.request_timeout
    }

    /// Stop the server; safe to call repeatedly
    pub async fn stop(&mut self) -> Result<()> {
        self.transport.stop(self.options.shutdown_grace).await
    }
}

fn deadline_after(limit: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(limit)
        .ok_or_else(|| Error::Config(format!("Timeout {:?} is too large", limit)))
}

/// Name a timeout after the operation the caller asked for
fn with_operation(error: Error, operation: String, limit: Duration) -> Error {
    match error {
        Error::Timeout { .. } => Error::timeout(operation, limit),
        other => other,
    }
}

/// Screenshots make for very long lines; keep debug logs readable
fn truncate_for_log(line: &str) -> String {
    const MAX_LOG_CHARS: usize = 512;
    if line.chars().count() <= MAX_LOG_CHARS {
        return line.to_string();
    }
    let head: String = line.chars().take(MAX_LOG_CHARS).collect();
    format!("{}... ({} bytes)", head, line.len())
}
