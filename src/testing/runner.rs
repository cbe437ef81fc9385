//! Scenario runner implementation
//!
//! Executes scenarios against a live MCP server through [`McpClient`],
//! asserting on structured tool results rather than raw output.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::mcp::{content, ClientOptions, McpClient};

use super::config::{seconds, CallExpectation, Scenario, StepAction};

/// Number of log messages quoted in a failure detail
const ERROR_SUMMARY_LIMIT: usize = 3;

/// Outcome of one check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Result of a scenario run
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub checks: Vec<CheckResult>,
    /// Server stderr captured when the run ended
    pub diagnostic_tail: String,
}

impl ScenarioReport {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.checks.len() - self.passed()
    }

    /// A run passes when it recorded checks and none of them failed
    pub fn success(&self) -> bool {
        !self.checks.is_empty() && self.failed() == 0
    }
}

/// How to run a scenario
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Server command line overriding the scenario's
    pub server_cmd: Option<String>,
    /// Used when neither the flag nor the scenario name a server
    pub default_server_cmd: String,
    /// Skip the scenario's cleanup calls
    pub keep_running: bool,
    pub verbose: bool,
    pub client: ClientOptions,
}

/// Collects and prints check results as they happen
#[derive(Default)]
struct Recorder {
    checks: Vec<CheckResult>,
}

impl Recorder {
    fn record(&mut self, name: &str, passed: bool, detail: String) {
        let status = if passed {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };
        println!("[{}] {}: {}", status, name, detail);
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed,
            detail,
        });
    }

    fn last_passed(&self) -> bool {
        self.checks.last().map_or(true, |c| c.passed)
    }
}

/// Run a scenario from a YAML file
pub async fn run_scenario(path: &Path, options: &RunOptions) -> Result<ScenarioReport> {
    let scenario = Scenario::load(path)?;
    run(&scenario, options).await
}

/// Run an already loaded scenario and print its summary
pub async fn run(scenario: &Scenario, options: &RunOptions) -> Result<ScenarioReport> {
    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let command = options
        .server_cmd
        .as_deref()
        .or(scenario.server.as_deref())
        .unwrap_or(&options.default_server_cmd);
    if options.verbose {
        println!("  $ {}", command.dimmed());
    }

    let mut recorder = Recorder::default();
    let mut client = match McpClient::spawn(command, options.client.clone()) {
        Ok(client) => client,
        Err(e) => {
            recorder.record("server_start", false, e.to_string());
            let report = ScenarioReport {
                name: scenario.name.clone(),
                checks: recorder.checks,
                diagnostic_tail: String::new(),
            };
            print_summary(&report);
            return Ok(report);
        }
    };

    let outcome = execute(&mut client, scenario, &mut recorder, options.verbose).await;

    let mut server_usable = true;
    if let Err(e) = &outcome {
        if recorder.last_passed() {
            recorder.record("scenario_runtime", false, e.to_string());
        }
        tracing::debug!("Scenario terminating due to: {}", e);
        server_usable = !e.is_fatal();
    }

    if server_usable && !options.keep_running {
        for call in &scenario.cleanup {
            let timeout = call.timeout_secs.and_then(|secs| seconds(secs).ok());
            if let Err(e) = client.call_tool(&call.tool, &call.arguments, timeout).await {
                tracing::debug!("Cleanup call '{}' failed: {}", call.tool, e);
            }
        }
    }

    if let Err(e) = client.stop().await {
        tracing::warn!("Failed to stop MCP server: {}", e);
    }

    let report = ScenarioReport {
        name: scenario.name.clone(),
        checks: recorder.checks,
        diagnostic_tail: client.diagnostic_tail(),
    };
    print_summary(&report);
    Ok(report)
}

async fn execute(
    client: &mut McpClient,
    scenario: &Scenario,
    recorder: &mut Recorder,
    verbose: bool,
) -> Result<()> {
    client.initialize().await?;

    let tools = client.list_tools().await?;
    if !scenario.required_tools.is_empty() {
        let available: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let mut missing: Vec<&str> = scenario
            .required_tools
            .iter()
            .map(String::as_str)
            .filter(|name| !available.contains(name))
            .collect();
        missing.sort_unstable();

        if !missing.is_empty() {
            recorder.record(
                "tooling_available",
                false,
                format!("Missing required MCP tools: {}", missing.join(", ")),
            );
            return Err(Error::Scenario("required tools unavailable".to_string()));
        }
        recorder.record(
            "tooling_available",
            true,
            format!("{} tools discovered", scenario.required_tools.join("/")),
        );
    }

    for step in &scenario.steps {
        if verbose {
            println!("  {} {}", "→".dimmed(), step.check.dimmed());
        }
        match run_step(client, &step.action).await {
            Ok(detail) => recorder.record(&step.check, true, detail),
            Err(e) => {
                recorder.record(&step.check, false, e.to_string());
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Run one step, returning the detail line of a passing check
async fn run_step(client: &mut McpClient, action: &StepAction) -> Result<String> {
    match action {
        StepAction::Call {
            tool,
            arguments,
            timeout_secs,
            expect,
        } => {
            let timeout = timeout_secs.map(seconds).transpose()?;
            let text = client.call_tool_text(tool, arguments, timeout).await?;
            check_expectation(&text, expect)?;
            Ok(first_line(&text))
        }

        StepAction::WaitFor {
            tool,
            arguments,
            flag,
            timeout_secs,
            interval_ms,
        } => {
            let started = Instant::now();
            let deadline = started + seconds(*timeout_secs)?;
            let expired = || {
                Error::Scenario(format!(
                    "'{}' did not become true within {:.1}s",
                    flag, timeout_secs
                ))
            };
            loop {
                // A poll may not outlive the step
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(expired());
                }
                let text = client
                    .call_tool_text(tool, arguments, Some(remaining))
                    .await?;
                let state = content::parse_json(&text)?;
                if content::flag(content::require_object(&state)?, flag) {
                    return Ok(format!(
                        "'{}' after {:.1}s",
                        flag,
                        started.elapsed().as_secs_f64()
                    ));
                }
                tokio::time::sleep_until(
                    (Instant::now() + Duration::from_millis(*interval_ms)).min(deadline),
                )
                .await;
            }
        }

        StepAction::Screenshot {
            tool,
            arguments,
            timeout_secs,
            attempts,
            retry_delay_ms,
            min_width,
            min_height,
        } => {
            let timeout = seconds(*timeout_secs)?;
            let (width, height) = capture_with_retry(
                client,
                tool,
                arguments,
                timeout,
                *attempts,
                Duration::from_millis(*retry_delay_ms),
            )
            .await?;

            if min_width.is_some_and(|min| width < min) || min_height.is_some_and(|min| height < min)
            {
                return Err(Error::Scenario(format!(
                    "screenshot {}x{} is smaller than {}x{}",
                    width,
                    height,
                    min_width.unwrap_or(0),
                    min_height.unwrap_or(0)
                )));
            }
            Ok(format!("screenshot captured ({}x{})", width, height))
        }

        StepAction::Performance {
            tool,
            arguments,
            timeout_secs,
            min_fps,
            max_frame_time_ms,
        } => {
            let timeout = timeout_secs.map(seconds).transpose()?;
            let text = client.call_tool_text(tool, arguments, timeout).await?;
            let perf = content::parse_json(&text)?;
            let perf = content::require_object(&perf)?;
            let fps = content::metric(perf, "fps");
            let frame_time_ms = content::metric(perf, "frame_time_ms");

            if fps >= *min_fps && frame_time_ms <= *max_frame_time_ms {
                Ok(format!("fps={:.2}, frame_time_ms={:.2}", fps, frame_time_ms))
            } else {
                Err(Error::Scenario(format!(
                    "fps={:.2} (<{:.2}) or frame_time_ms={:.2} (>{:.2})",
                    fps, min_fps, frame_time_ms, max_frame_time_ms
                )))
            }
        }

        StepAction::LogErrors {
            tool,
            arguments,
            timeout_secs,
        } => {
            let timeout = timeout_secs.map(seconds).transpose()?;
            let text = client.call_tool_text(tool, arguments, timeout).await?;
            let messages = parse_log_messages(&text);
            if messages.is_empty() {
                Ok("none".to_string())
            } else {
                Err(Error::Scenario(format!(
                    "Runtime errors: {}",
                    summarize_errors(&messages, ERROR_SUMMARY_LIMIT)
                )))
            }
        }

        StepAction::NodeText {
            tool,
            node_path,
            property,
            equals,
            timeout_secs,
            attempts,
            retry_delay_ms,
        } => {
            let read = NodeRead {
                tool,
                node_path,
                timeout: timeout_secs.map(seconds).transpose()?,
                attempts: *attempts,
                retry_delay: Duration::from_millis(*retry_delay_ms),
            };
            let props = read_node_properties(client, &read).await?;
            let text = content::require_str(&props, property)?.trim();

            if text.is_empty() {
                return Err(Error::Scenario(format!(
                    "'{}' of {} is empty",
                    property, node_path
                )));
            }
            if let Some(expected) = equals {
                if text != expected.trim() {
                    return Err(Error::Scenario(format!(
                        "'{}' of {} is '{}', expected '{}'",
                        property, node_path, text, expected
                    )));
                }
            }
            Ok(first_line(text))
        }

        StepAction::NodeMoves {
            tool,
            node_path,
            property,
            interact,
            min_delta,
            timeout_secs,
            attempts,
            retry_delay_ms,
        } => {
            let read = NodeRead {
                tool,
                node_path,
                timeout: timeout_secs.map(seconds).transpose()?,
                attempts: *attempts,
                retry_delay: Duration::from_millis(*retry_delay_ms),
            };
            let before = node_vec2(client, &read, property).await?;

            let interact_timeout = interact.timeout_secs.map(seconds).transpose()?;
            client
                .call_tool_text(&interact.tool, &interact.arguments, interact_timeout)
                .await?;

            let after = node_vec2(client, &read, property).await?;
            let moved = (after.0 - before.0).abs() + (after.1 - before.1).abs();
            if moved >= *min_delta {
                Ok(format!("'{}' moved {:.1}", property, moved))
            } else {
                Err(Error::Scenario(format!(
                    "'{}' of {} moved {:.1} (<{:.1})",
                    property, node_path, moved, min_delta
                )))
            }
        }

        StepAction::Sleep { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Ok(format!("waited {}ms", ms))
        }
    }
}

/// Capture a screenshot, retrying with a linearly growing delay
async fn capture_with_retry(
    client: &mut McpClient,
    tool: &str,
    arguments: &Value,
    timeout: Duration,
    attempts: u32,
    retry_delay: Duration,
) -> Result<(u32, u32)> {
    let mut last_error = None;
    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(retry_delay * attempt).await;
        }
        let captured = match client.call_tool(tool, arguments, Some(timeout)).await {
            Ok(result) => content::image_dimensions(&result.content),
            Err(e) => Err(e),
        };
        match captured {
            Ok(size) => return Ok(size),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!("Screenshot attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(Error::Scenario(format!(
        "Failed to capture screenshot: {}",
        last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string())
    )))
}

/// How to read a node's properties
struct NodeRead<'a> {
    tool: &'a str,
    node_path: &'a str,
    timeout: Option<Duration>,
    attempts: u32,
    retry_delay: Duration,
}

/// Read a node's properties, retrying with a linearly growing delay
///
/// Accepts `{"properties": {...}}` or a bare object; anything else reads as
/// no properties.
async fn read_node_properties(
    client: &mut McpClient,
    read: &NodeRead<'_>,
) -> Result<Map<String, Value>> {
    let arguments = json!({"action": "get_properties", "node_path": read.node_path});
    let mut last_error = None;

    for attempt in 0..read.attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(read.retry_delay * attempt).await;
        }
        let payload = match client
            .call_tool_text(read.tool, &arguments, read.timeout)
            .await
        {
            Ok(text) => content::parse_json(&text),
            Err(e) => Err(e),
        };
        match payload {
            Ok(Value::Object(mut payload)) => {
                return Ok(match payload.remove("properties") {
                    Some(Value::Object(props)) => props,
                    Some(other) => {
                        payload.insert("properties".to_string(), other);
                        payload
                    }
                    None => payload,
                })
            }
            Ok(_) => return Ok(Map::new()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(
                    "Reading {} failed (attempt {}): {}",
                    read.node_path,
                    attempt + 1,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Err(Error::Scenario(format!(
        "Failed to read node properties for {}: {}",
        read.node_path,
        last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string())
    )))
}

async fn node_vec2(
    client: &mut McpClient,
    read: &NodeRead<'_>,
    property: &str,
) -> Result<(f64, f64)> {
    let props = read_node_properties(client, read).await?;
    Ok(props.get(property).map_or((0.0, 0.0), content::vec2))
}

fn check_expectation(text: &str, expect: &CallExpectation) -> Result<()> {
    for needle in &expect.text_contains {
        if !text.contains(needle.as_str()) {
            return Err(Error::Scenario(format!(
                "expected output to contain '{}'",
                needle
            )));
        }
    }

    if !expect.needs_json() {
        return Ok(());
    }

    let value = content::parse_json(text)?;
    let object = content::require_object(&value)?;
    for key in &expect.json_flags {
        if !content::flag(object, key) {
            return Err(Error::Scenario(format!("'{}' is not true", key)));
        }
    }
    for (key, expected) in &expect.json_equals {
        let actual = object.get(key).unwrap_or(&Value::Null);
        if actual != expected {
            return Err(Error::Scenario(format!(
                "{} = {}, expected {}",
                key, actual, expected
            )));
        }
    }
    Ok(())
}

/// First line of a tool's text, shortened for the report
fn first_line(text: &str) -> String {
    const MAX_DETAIL_CHARS: usize = 120;
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return "ok".to_string();
    }
    if line.chars().count() > MAX_DETAIL_CHARS {
        let head: String = line.chars().take(MAX_DETAIL_CHARS).collect();
        return format!("{}...", head);
    }
    line.to_string()
}

/// Parse the text returned by a log-message tool
///
/// Accepts `{"messages": [...]}`, a bare array, or free text (treated as a
/// single message). Empty text and "No log messages" mean no messages.
pub fn parse_log_messages(text: &str) -> Vec<Map<String, Value>> {
    let stripped = text.trim();
    if stripped.is_empty() || stripped == "No log messages" {
        return Vec::new();
    }

    let objects = |items: Vec<Value>| -> Vec<Map<String, Value>> {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    };

    match serde_json::from_str::<Value>(stripped) {
        Ok(Value::Object(mut payload)) => match payload.remove("messages") {
            Some(Value::Array(items)) => objects(items),
            _ => Vec::new(),
        },
        Ok(Value::Array(items)) => objects(items),
        Ok(_) => Vec::new(),
        Err(_) => {
            let mut message = Map::new();
            message.insert("message".to_string(), Value::from(stripped));
            vec![message]
        }
    }
}

/// One-line summary of log messages: `file:line message | ... +N more`
pub fn summarize_errors(messages: &[Map<String, Value>], limit: usize) -> String {
    if messages.is_empty() {
        return "none".to_string();
    }

    let mut snippets: Vec<String> = messages
        .iter()
        .take(limit)
        .map(|msg| {
            let text = match msg.get("message") {
                Some(Value::String(s)) => s.trim().replace('\n', " "),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let file = msg.get("file").and_then(Value::as_str).unwrap_or("");
            if file.is_empty() {
                text
            } else {
                let line = msg.get("line").cloned().unwrap_or(Value::from(0));
                format!("{}:{} {}", file, line, text)
            }
        })
        .collect();

    if messages.len() > limit {
        snippets.push(format!("... +{} more", messages.len() - limit));
    }
    snippets.join(" | ")
}

fn print_summary(report: &ScenarioReport) {
    println!();
    println!("{}", format!("{} Summary", report.name).bold());
    println!("- Total checks: {}", report.checks.len());
    println!("- Passed: {}", report.passed());
    println!("- Failed: {}", report.failed());

    if report.success() {
        println!("- Status: {}", "PASS".green().bold());
        return;
    }

    println!("- Status: {}", "FAIL".red().bold());
    if !report.diagnostic_tail.is_empty() {
        println!("- MCP stderr (tail):");
        println!("{}", report.diagnostic_tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_log_messages_empty() {
        assert!(parse_log_messages("").is_empty());
        assert!(parse_log_messages("  No log messages \n").is_empty());
        assert!(parse_log_messages(r#"{"messages": "none"}"#).is_empty());
        assert!(parse_log_messages("42").is_empty());
    }

    #[test]
    fn test_parse_log_messages_shapes() {
        let wrapped = parse_log_messages(r#"{"messages": [{"message": "a"}, 3, {"message": "b"}]}"#);
        assert_eq!(wrapped.len(), 2);

        let bare = parse_log_messages(r#"[{"message": "only"}]"#);
        assert_eq!(bare[0]["message"], "only");

        let text = parse_log_messages("ERROR: something broke");
        assert_eq!(text[0]["message"], "ERROR: something broke");
    }

    #[test]
    fn test_summarize_errors() {
        let messages = vec![
            object(json!({"message": "Null instance\naccess", "file": "res://unit.gd", "line": 42})),
            object(json!({"message": "plain"})),
            object(json!({"message": "third", "file": "res://ai.gd"})),
            object(json!({"message": "fourth"})),
            object(json!({"message": "fifth"})),
        ];
        assert_eq!(
            summarize_errors(&messages, 3),
            "res://unit.gd:42 Null instance access | plain | res://ai.gd:0 third | ... +2 more"
        );
        assert_eq!(summarize_errors(&[], 3), "none");
    }

    #[test]
    fn test_check_expectation() {
        let expect = CallExpectation {
            text_contains: vec!["connected".to_string()],
            json_flags: vec!["connected".to_string()],
            json_equals: object(json!({"server_version": "1.2.0"})),
        };
        let ok = r#"{"connected": true, "server_version": "1.2.0"}"#;
        assert!(check_expectation(ok, &expect).is_ok());

        let disconnected = r#"{"connected": false, "server_version": "1.2.0"}"#;
        assert!(matches!(
            check_expectation(disconnected, &expect).unwrap_err(),
            Error::Scenario(_)
        ));

        let mismatch = r#"{"connected": true, "server_version": "1.1.0"}"#;
        let err = check_expectation(mismatch, &expect).unwrap_err();
        assert!(err.to_string().contains("server_version"));
    }

    #[test]
    fn test_check_expectation_text_only_skips_json() {
        let expect = CallExpectation {
            text_contains: vec!["camera_up:".to_string()],
            ..Default::default()
        };
        assert!(check_expectation("camera_up: W\ncamera_down: S", &expect).is_ok());
        assert!(check_expectation("select: LMB", &expect).is_err());
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line(""), "ok");
        assert_eq!(first_line("Sequence done\nmore"), "Sequence done");
        assert!(first_line(&"y".repeat(300)).ends_with("..."));
    }

    #[test]
    fn test_report_counts() {
        let report = ScenarioReport {
            name: "r".to_string(),
            checks: vec![
                CheckResult {
                    name: "a".into(),
                    passed: true,
                    detail: String::new(),
                },
                CheckResult {
                    name: "b".into(),
                    passed: false,
                    detail: String::new(),
                },
            ],
            diagnostic_tail: String::new(),
        };
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.success());
    }
}
