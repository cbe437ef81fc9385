//! MCP harness - drive an MCP server over stdio
//!
//! This library provides a Model Context Protocol client for a server
//! process speaking newline-delimited JSON-RPC on stdin/stdout, plus a
//! scenario runner for smoke-testing the application behind it.

pub mod cli;
pub mod commands;
pub mod common;
pub mod mcp;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use mcp::{ClientOptions, McpClient};
