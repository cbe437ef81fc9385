//! Mock MCP server binary for integration testing
//!
//! Implements a minimal stdio MCP server exposing game-editor-like tools,
//! plus a few misbehaving tools (hang, slow, crash, stray ids) to exercise
//! the client's failure paths without a real application.

use base64::Engine;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::default();

    // Wrappers like npx print banners; the client must skip them
    writeln!(writer, "mock-mcp-server starting").ok();
    writer.flush().ok();
    eprintln!("mock-mcp-server: ready");

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                eprintln!("mock-mcp-server: ignoring invalid JSON");
                continue;
            }
        };

        for output in state.process_message(&message) {
            match output {
                Output::Line(text) => {
                    writeln!(writer, "{}", text).ok();
                }
                Output::Message(value) => send_message(&mut writer, &value),
                Output::Pause(duration) => {
                    writer.flush().ok();
                    std::thread::sleep(duration);
                }
                Output::Exit(code) => {
                    writer.flush().ok();
                    eprintln!("mock-mcp-server: exiting with {}", code);
                    std::process::exit(code);
                }
            }
        }
        writer.flush().ok();
    }

    eprintln!("mock-mcp-server: stdin closed");
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let body = serde_json::to_string(message).unwrap();
    writeln!(writer, "{}", body).ok();
}

enum Output {
    Line(String),
    Message(Value),
    Pause(Duration),
    Exit(i32),
}

#[derive(Default)]
struct MockState {
    initialized: bool,
    /// Request ids in arrival order
    request_ids: Vec<Value>,
    /// Responses received for our own pings
    pongs: u32,
    state_polls: u32,
    next_ping: u32,
    /// Moved by every input sequence
    camera: (f64, f64),
    flaky_reads: u32,
}

impl MockState {
    fn process_message(&mut self, message: &Value) -> Vec<Output> {
        let id = message.get("id").cloned();
        let method = message.get("method").and_then(Value::as_str);

        let (id, method) = match (id, method) {
            (Some(_), None) => {
                // Reply to one of our pings
                self.pongs += 1;
                return Vec::new();
            }
            (None, Some("notifications/initialized")) => {
                self.initialized = true;
                eprintln!("mock-mcp-server: client initialized");
                return Vec::new();
            }
            (None, Some(other)) => {
                eprintln!("mock-mcp-server: notification {}", other);
                return Vec::new();
            }
            (Some(id), Some(method)) => (id, method),
            (None, None) => return Vec::new(),
        };

        self.request_ids.push(id.clone());
        let params = message.get("params").cloned().unwrap_or(json!({}));

        match method {
            "initialize" => {
                if std::env::var_os("MOCK_FAIL_INITIALIZE").is_some() {
                    return vec![error(&id, -32002, "unsupported protocol version")];
                }
                if std::env::var_os("MOCK_BAD_SERVER_INFO").is_some() {
                    return vec![result(&id, json!({"serverInfo": "mock-mcp 0.1.0"}))];
                }
                vec![result(
                    &id,
                    json!({
                        "protocolVersion": params["protocolVersion"],
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock-mcp", "version": "0.1.0"}
                    }),
                )]
            }
            "tools/list" => vec![result(
                &id,
                json!({
                    "tools": [
                        {"name": "editor", "description": "Editor control"},
                        {"name": "input", "description": "Input injection"},
                        {"name": "project", "description": "Project status"},
                        {"name": "node", "description": "Scene node inspection"},
                        {"name": "echo"},
                        {"name": "stats"}
                    ]
                }),
            )],
            "tools/call" => self.call_tool(&id, &params),
            other => vec![error(&id, -32601, &format!("Method not found: {}", other))],
        }
    }

    fn call_tool(&mut self, id: &Value, params: &Value) -> Vec<Output> {
        let name = params["name"].as_str().unwrap_or("");
        let arguments = &params["arguments"];
        let action = arguments["action"].as_str().unwrap_or("");

        match name {
            "echo" => {
                self.next_ping += 1;
                vec![
                    Output::Message(json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/message",
                        "params": {"level": "info", "data": "echoing"}
                    })),
                    Output::Line("this line is not JSON".to_string()),
                    Output::Message(json!({
                        "jsonrpc": "2.0",
                        "id": format!("ping-{}", self.next_ping),
                        "method": "ping"
                    })),
                    tool_text(id, &arguments.to_string()),
                ]
            }
            "stats" => tool_text(
                id,
                &json!({
                    "initialized": self.initialized,
                    "pongs": self.pongs,
                    "request_ids": self.request_ids,
                })
                .to_string(),
            )
            .into_vec(),
            "fail" => vec![Output::Message(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{"type": "text", "text": "tool exploded"}],
                    "isError": true
                }
            }))],
            "hang" => Vec::new(),
            "slow" => {
                let ms = arguments["ms"].as_u64().unwrap_or(500);
                vec![
                    Output::Pause(Duration::from_millis(ms)),
                    tool_text(id, "finally"),
                ]
            }
            "stray" => {
                let wrong = id.as_i64().unwrap_or(0) + 1000;
                vec![tool_text(&json!(wrong), "not yours")]
            }
            "crash" => vec![Output::Exit(7)],
            "editor" => self.editor(id, action),
            "project" => tool_text(
                id,
                &json!({
                    "connected": true,
                    "versions_match": true,
                    "server_version": "0.1.0",
                    "addon_version": "0.1.0"
                })
                .to_string(),
            )
            .into_vec(),
            "input" => match action {
                "get_map" => tool_text(id, "camera_up: W\ncamera_down: S\nselect: LMB").into_vec(),
                _ => {
                    self.camera.0 += 120.0;
                    self.camera.1 -= 80.0;
                    tool_text(id, "Sequence completed").into_vec()
                }
            },
            "node" => self.node(id, arguments["node_path"].as_str().unwrap_or("")),
            other => vec![error(id, -32602, &format!("Unknown tool: {}", other))],
        }
    }

    fn node(&mut self, id: &Value, path: &str) -> Vec<Output> {
        let properties = match path {
            "/root/Main/GameMap/Camera2D" => json!({
                "position": {"x": self.camera.0, "y": self.camera.1},
                "zoom": [1.0, 1.0]
            }),
            "/root/Main/HUD/HintLabel" => json!({"text": "  Build a farm to grow food \n"}),
            "/root/Main/HUD/Flaky" => {
                self.flaky_reads += 1;
                if self.flaky_reads == 1 {
                    return vec![Output::Message(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "content": [{"type": "text", "text": "node not ready"}],
                            "isError": true
                        }
                    }))];
                }
                // Bare object, no "properties" wrapper
                return tool_text(id, &json!({"text": "ready"}).to_string()).into_vec();
            }
            _ => json!({}),
        };
        tool_text(id, &json!({"properties": properties}).to_string()).into_vec()
    }

    fn editor(&mut self, id: &Value, action: &str) -> Vec<Output> {
        let output = match action {
            "get_state" => {
                self.state_polls += 1;
                tool_text(
                    id,
                    &json!({
                        "is_playing": self.state_polls >= 2,
                        "current_scene": "res://scenes/main/main.tscn"
                    })
                    .to_string(),
                )
            }
            "screenshot_game" => Output::Message(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [
                        {"type": "text", "text": "Screenshot captured"},
                        {"type": "image", "data": png_base64(640, 360), "mimeType": "image/png"}
                    ]
                }
            })),
            "get_performance" => tool_text(
                id,
                &json!({"fps": 60.0, "frame_time_ms": 16.6}).to_string(),
            ),
            "get_log_messages" => tool_text(id, "No log messages"),
            _ => tool_text(id, "ok"),
        };
        vec![output]
    }
}

impl Output {
    fn into_vec(self) -> Vec<Output> {
        vec![self]
    }
}

fn result(id: &Value, result: Value) -> Output {
    Output::Message(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn error(id: &Value, code: i64, message: &str) -> Output {
    Output::Message(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    }))
}

fn tool_text(id: &Value, text: &str) -> Output {
    result(id, json!({"content": [{"type": "text", "text": text}]}))
}

/// PNG header bytes followed by filler; enough for dimension parsing
fn png_base64(width: u32, height: u32) -> String {
    let mut bytes = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0u8; 256]);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
