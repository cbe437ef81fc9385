//! CLI command handling
//!
//! Dispatches CLI commands to an MCP server and formats output.

use std::time::Duration;

use serde_json::Value;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::mcp::{content, ClientOptions, McpClient};
use crate::testing::{self, seconds, RunOptions};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, verbose: bool) -> Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Run {
            scenario,
            server_cmd,
            request_timeout,
            keep_running,
        } => {
            let mut client = ClientOptions::from_config(&config);
            if let Some(secs) = request_timeout {
                client.request_timeout = seconds(secs)?;
            }

            let options = RunOptions {
                server_cmd,
                default_server_cmd: config.server.command.clone(),
                keep_running,
                verbose,
                client,
            };
            let report = testing::run_scenario(&scenario, &options).await?;
            if !report.success() {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Tools { server_cmd } => {
            let command = server_cmd.unwrap_or_else(|| config.server.command.clone());
            let mut client = McpClient::spawn(&command, ClientOptions::from_config(&config))?;

            let outcome = list_tools(&mut client).await;
            finish(client, outcome).await
        }

        Commands::Call {
            tool,
            args,
            timeout,
            image_size,
            server_cmd,
        } => {
            let arguments = parse_arguments(args.as_deref())?;
            let timeout = timeout.map(seconds).transpose()?;
            let command = server_cmd.unwrap_or_else(|| config.server.command.clone());
            let mut client = McpClient::spawn(&command, ClientOptions::from_config(&config))?;

            let outcome = call_tool(&mut client, &tool, &arguments, timeout, image_size).await;
            finish(client, outcome).await
        }
    }
}

async fn list_tools(client: &mut McpClient) -> Result<()> {
    client.initialize().await?;
    let tools = client.list_tools().await?;

    if tools.is_empty() {
        println!("No tools exposed");
    }
    for tool in &tools {
        match tool.description.as_deref().map(first_line) {
            Some(desc) if !desc.is_empty() => println!("{:<24} {}", tool.name, desc),
            _ => println!("{}", tool.name),
        }
    }
    Ok(())
}

async fn call_tool(
    client: &mut McpClient,
    tool: &str,
    arguments: &Value,
    timeout: Option<Duration>,
    image_size: bool,
) -> Result<()> {
    client.initialize().await?;
    let result = client.call_tool(tool, arguments, timeout).await?;

    if image_size {
        let (width, height) = content::image_dimensions(&result.content)?;
        println!("{}x{}", width, height);
    } else {
        println!("{}", content::text_of(&result.content));
    }
    Ok(())
}

/// Stop the server, logging its stderr tail if the command failed
async fn finish(mut client: McpClient, outcome: Result<()>) -> Result<()> {
    if outcome.is_err() {
        let tail = client.diagnostic_tail();
        if !tail.is_empty() {
            tracing::warn!("MCP server stderr (tail):\n{}", tail);
        }
    }
    if let Err(e) = client.stop().await {
        tracing::warn!("Failed to stop MCP server: {}", e);
    }
    outcome
}

/// Parse `--args`; arguments must be a JSON object
fn parse_arguments(args: Option<&str>) -> Result<Value> {
    let Some(raw) = args else {
        return Ok(Value::Object(Default::default()));
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(Error::Config("--args must be a JSON object".to_string())),
        Err(e) => Err(Error::Config(format!("Invalid --args JSON: {}", e))),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}
