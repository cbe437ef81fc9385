//! Model Context Protocol (MCP) client
//!
//! This module implements the client side of MCP over stdio for driving a
//! server process: transport, wire codec, session and result extraction.

pub mod client;
pub mod codec;
pub mod content;
pub mod diagnostics;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, McpClient};
pub use diagnostics::DiagnosticLog;
pub use types::*;
