//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a YAML test scenario against an MCP server
    Run {
        /// Path to the YAML test scenario file
        scenario: PathBuf,

        /// Server command line (overrides the scenario and config)
        #[arg(long)]
        server_cmd: Option<String>,

        /// Default request timeout in seconds
        #[arg(long)]
        request_timeout: Option<f64>,

        /// Leave the application running (skip cleanup calls)
        #[arg(long)]
        keep_running: bool,
    },

    /// List the tools exposed by the server
    Tools {
        /// Server command line (overrides config)
        #[arg(long)]
        server_cmd: Option<String>,
    },

    /// Call a single tool and print its result
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Print the returned image size as WIDTHxHEIGHT instead of the text
        #[arg(long)]
        image_size: bool,

        /// Server command line (overrides config)
        #[arg(long)]
        server_cmd: Option<String>,
    },
}
