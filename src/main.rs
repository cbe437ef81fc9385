//! MCP harness CLI
//!
//! Runs smoke-test scenarios and ad-hoc tool calls against a stdio MCP
//! server.

use clap::Parser;
use commands::Commands;
use mcp_harness::{cli, commands, common::logging};

#[derive(Parser)]
#[command(name = "mcp-harness", about = "Drive an MCP server over stdio")]
#[command(version, long_about = None)]
struct Cli {
    /// Show protocol traffic and server stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.verbose);

    if let Err(e) = cli::dispatch(cli.command, cli.verbose).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
