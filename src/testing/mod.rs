//! Scenario runner
//!
//! Reads YAML test scenarios and drives an MCP server through
//! [`McpClient`](crate::mcp::McpClient), so assertions are made against
//! structured tool results rather than fragile string matching.

mod config;
mod runner;

pub use config::*;
pub use runner::{
    parse_log_messages, run, run_scenario, summarize_errors, CheckResult, RunOptions,
    ScenarioReport,
};
