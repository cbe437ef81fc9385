//! Scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::common::config::timeout_from_secs;
use crate::common::{Error, Result};

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct Scenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Server command line; the CLI flag takes precedence
    pub server: Option<String>,
    /// Tools that must be listed by the server before any step runs
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// The checks to run, in order
    pub steps: Vec<Step>,
    /// Tool calls made after the steps (skipped with --keep-running)
    #[serde(default)]
    pub cleanup: Vec<ToolCall>,
}

/// A named check
#[derive(Deserialize, Debug)]
pub struct Step {
    /// Name reported as PASS/FAIL
    pub check: String,
    #[serde(flatten)]
    pub action: StepAction,
}

/// A plain tool invocation
#[derive(Deserialize, Debug, Clone)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    pub timeout_secs: Option<f64>,
}

/// What a step does
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Call a tool and check its text
    Call {
        tool: String,
        #[serde(default = "empty_object")]
        arguments: Value,
        timeout_secs: Option<f64>,
        #[serde(default)]
        expect: CallExpectation,
    },
    /// Poll a tool until a boolean field of its JSON text becomes true
    WaitFor {
        tool: String,
        #[serde(default = "empty_object")]
        arguments: Value,
        /// Field that must become true (e.g. "is_playing")
        flag: String,
        #[serde(default = "default_wait_secs")]
        timeout_secs: f64,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
    },
    /// Capture a screenshot and read its dimensions
    Screenshot {
        tool: String,
        #[serde(default = "empty_object")]
        arguments: Value,
        #[serde(default = "default_screenshot_secs")]
        timeout_secs: f64,
        /// Total capture attempts; rendering may need to warm up
        #[serde(default = "default_attempts")]
        attempts: u32,
        /// Delay before attempt n is n times this value
        #[serde(default = "default_retry_delay_ms")]
        retry_delay_ms: u64,
        min_width: Option<u32>,
        min_height: Option<u32>,
    },
    /// Read fps / frame time and compare against limits
    Performance {
        tool: String,
        #[serde(default = "empty_object")]
        arguments: Value,
        timeout_secs: Option<f64>,
        min_fps: f64,
        max_frame_time_ms: f64,
    },
    /// Fetch runtime log messages and fail if there are any
    LogErrors {
        tool: String,
        #[serde(default = "empty_object")]
        arguments: Value,
        timeout_secs: Option<f64>,
    },
    /// Read a node's string property and check it is set
    NodeText {
        #[serde(default = "default_node_tool")]
        tool: String,
        node_path: String,
        property: String,
        /// Exact text expected; otherwise any non-blank text passes
        equals: Option<String>,
        timeout_secs: Option<f64>,
        #[serde(default = "default_node_attempts")]
        attempts: u32,
        #[serde(default = "default_node_retry_delay_ms")]
        retry_delay_ms: u64,
    },
    /// Read a node's 2D property, run an interaction, and check it moved
    NodeMoves {
        #[serde(default = "default_node_tool")]
        tool: String,
        node_path: String,
        #[serde(default = "default_vec2_property")]
        property: String,
        /// The interaction expected to move the node
        interact: ToolCall,
        /// Minimum |dx| + |dy|
        min_delta: f64,
        timeout_secs: Option<f64>,
        #[serde(default = "default_node_attempts")]
        attempts: u32,
        #[serde(default = "default_node_retry_delay_ms")]
        retry_delay_ms: u64,
    },
    /// Let the application run
    Sleep { ms: u64 },
}

/// Expectations for a call result
#[derive(Deserialize, Debug, Default)]
pub struct CallExpectation {
    /// Substrings that must all appear in the text
    #[serde(default)]
    pub text_contains: Vec<String>,
    /// Fields of the JSON text that must be true
    #[serde(default)]
    pub json_flags: Vec<String>,
    /// Fields of the JSON text that must equal the given values
    #[serde(default)]
    pub json_equals: Map<String, Value>,
}

impl CallExpectation {
    /// Whether the text has to be parsed as JSON
    pub fn needs_json(&self) -> bool {
        !self.json_flags.is_empty() || !self.json_equals.is_empty()
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
fn default_wait_secs() -> f64 {
    20.0
}
fn default_interval_ms() -> u64 {
    500
}
fn default_screenshot_secs() -> f64 {
    30.0
}
fn default_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    600
}
fn default_node_tool() -> String {
    "node".to_string()
}
fn default_vec2_property() -> String {
    "position".to_string()
}
fn default_node_attempts() -> u32 {
    4
}
fn default_node_retry_delay_ms() -> u64 {
    200
}

/// Convert a timeout from the scenario file or the command line
pub fn seconds(value: f64) -> Result<Duration> {
    timeout_from_secs("timeout", value)
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read test scenario '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate scenario YAML
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        let mut timeouts: Vec<f64> = self.cleanup.iter().filter_map(|c| c.timeout_secs).collect();
        for step in &self.steps {
            match &step.action {
                StepAction::Call { timeout_secs, .. }
                | StepAction::Performance { timeout_secs, .. }
                | StepAction::LogErrors { timeout_secs, .. }
                | StepAction::NodeText { timeout_secs, .. } => timeouts.extend(*timeout_secs),
                StepAction::WaitFor { timeout_secs, .. }
                | StepAction::Screenshot { timeout_secs, .. } => timeouts.push(*timeout_secs),
                StepAction::NodeMoves {
                    timeout_secs,
                    interact,
                    ..
                } => {
                    timeouts.extend(*timeout_secs);
                    timeouts.extend(interact.timeout_secs);
                }
                StepAction::Sleep { .. } => {}
            }
        }
        for secs in timeouts {
            seconds(secs)?;
        }

        for step in &self.steps {
            match &step.action {
                StepAction::Screenshot { attempts: 0, .. }
                | StepAction::NodeText { attempts: 0, .. }
                | StepAction::NodeMoves { attempts: 0, .. } => {
                    return Err(Error::Config(format!(
                        "Step '{}': attempts must be at least 1",
                        step.check
                    )));
                }
                StepAction::NodeMoves { min_delta, .. }
                    if !min_delta.is_finite() || *min_delta < 0.0 =>
                {
                    return Err(Error::Config(format!(
                        "Step '{}': min_delta must be a non-negative number",
                        step.check
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMOKE: &str = r#"
name: smoke
description: Startup, input and performance guardrails
required_tools: [editor, input, project]
steps:
  - check: addon_connection
    action: call
    tool: project
    arguments: {action: addon_status}
    expect:
      json_flags: [connected]
  - check: startup_to_gameplay
    action: wait_for
    tool: editor
    arguments: {action: get_state}
    flag: is_playing
    timeout_secs: 20
  - check: screenshot
    action: screenshot
    tool: editor
    arguments: {action: screenshot_game, max_width: 640}
    min_width: 320
  - check: performance_guardrail
    action: performance
    tool: editor
    arguments: {action: get_performance}
    min_fps: 15
    max_frame_time_ms: 120
  - check: settle
    action: sleep
    ms: 250
  - check: runtime_errors
    action: log_errors
    tool: editor
    arguments: {action: get_log_messages, clear: true, limit: 200}
cleanup:
  - tool: editor
    arguments: {action: stop}
"#;

    #[test]
    fn test_parse_smoke_scenario() {
        let scenario = Scenario::parse(SMOKE).unwrap();
        assert_eq!(scenario.name, "smoke");
        assert_eq!(scenario.required_tools, vec!["editor", "input", "project"]);
        assert_eq!(scenario.steps.len(), 6);
        assert_eq!(scenario.cleanup.len(), 1);

        match &scenario.steps[0].action {
            StepAction::Call { tool, expect, .. } => {
                assert_eq!(tool, "project");
                assert_eq!(expect.json_flags, vec!["connected"]);
                assert!(expect.needs_json());
            }
            other => panic!("unexpected step: {other:?}"),
        }

        match &scenario.steps[2].action {
            StepAction::Screenshot {
                timeout_secs,
                attempts,
                retry_delay_ms,
                min_width,
                ..
            } => {
                assert_eq!(*timeout_secs, 30.0);
                assert_eq!(*attempts, 3);
                assert_eq!(*retry_delay_ms, 600);
                assert_eq!(*min_width, Some(320));
            }
            other => panic!("unexpected step: {other:?}"),
        }

        match &scenario.steps[3].action {
            StepAction::Performance {
                min_fps,
                max_frame_time_ms,
                ..
            } => {
                assert_eq!(*min_fps, 15.0);
                assert_eq!(*max_frame_time_ms, 120.0);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_parse_node_steps() {
        let scenario = Scenario::parse(
            r#"
name: playability
steps:
  - check: progression_hint
    action: node_text
    node_path: /root/Main/HUD/HintLabel
    property: text
  - check: minimap_camera_delta
    action: node_moves
    node_path: /root/Main/GameMap/Camera2D
    min_delta: 16
    interact:
      tool: input
      arguments: {action: sequence, inputs: []}
      timeout_secs: 35
"#,
        )
        .unwrap();

        match &scenario.steps[0].action {
            StepAction::NodeText {
                tool,
                property,
                equals,
                attempts,
                retry_delay_ms,
                ..
            } => {
                assert_eq!(tool, "node");
                assert_eq!(property, "text");
                assert!(equals.is_none());
                assert_eq!(*attempts, 4);
                assert_eq!(*retry_delay_ms, 200);
            }
            other => panic!("unexpected step: {other:?}"),
        }

        match &scenario.steps[1].action {
            StepAction::NodeMoves {
                property,
                interact,
                min_delta,
                ..
            } => {
                assert_eq!(property, "position");
                assert_eq!(interact.tool, "input");
                assert_eq!(interact.timeout_secs, Some(35.0));
                assert_eq!(*min_delta, 16.0);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_node_step_validation() {
        let zero_attempts = "name: s\nsteps:\n  - check: x\n    action: node_text\n    node_path: /a\n    property: text\n    attempts: 0\n";
        assert!(matches!(
            Scenario::parse(zero_attempts).unwrap_err(),
            Error::Config(_)
        ));

        let negative_delta = "name: s\nsteps:\n  - check: x\n    action: node_moves\n    node_path: /a\n    min_delta: -1\n    interact: {tool: input}\n";
        assert!(matches!(
            Scenario::parse(negative_delta).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn test_arguments_default_to_empty_object() {
        let scenario = Scenario::parse(
            "name: s\nsteps:\n  - check: tools\n    action: call\n    tool: editor\n",
        )
        .unwrap();
        match &scenario.steps[0].action {
            StepAction::Call {
                arguments, expect, ..
            } => {
                assert_eq!(arguments, &empty_object());
                assert!(!expect.needs_json());
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = Scenario::parse("name: s\nsteps:\n  - check: x\n    action: dance\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_negative_timeout_is_rejected() {
        let err = Scenario::parse(
            "name: s\nsteps:\n  - check: x\n    action: call\n    tool: t\n    timeout_secs: -2\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_huge_timeout_is_rejected() {
        let err = Scenario::parse(
            "name: s\nsteps:\n  - check: x\n    action: wait_for\n    tool: t\n    flag: f\n    timeout_secs: 1e30\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let err = Scenario::parse(
            "name: s\nsteps:\n  - check: x\n    action: screenshot\n    tool: t\n    attempts: 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
