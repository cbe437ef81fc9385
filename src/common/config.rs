//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// MCP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Server stderr buffer settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Identity sent in the initialize handshake
    #[serde(default)]
    pub client: ClientIdentity,
}

/// MCP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Command line used to start the MCP server
    #[serde(default = "default_server_command")]
    pub command: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_server_command(),
        }
    }
}

fn default_server_command() -> String {
    "npx -y @satelliteoflove/godot-mcp".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Default timeout for each MCP request
    #[serde(default = "default_request")]
    pub request_secs: f64,

    /// Lower bound for the initialize handshake timeout
    #[serde(default = "default_handshake_floor")]
    pub handshake_floor_secs: f64,

    /// Grace period between terminate and kill on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_secs: default_request(),
            handshake_floor_secs: default_handshake_floor(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_request() -> f64 {
    20.0
}
fn default_handshake_floor() -> f64 {
    45.0
}
fn default_shutdown_grace() -> f64 {
    5.0
}

/// Server stderr buffer configuration
#[derive(Debug, Deserialize)]
pub struct DiagnosticsConfig {
    /// Maximum number of stderr lines kept for failure reports
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    200
}

/// Client identity for the handshake
#[derive(Debug, Deserialize, Clone)]
pub struct ClientIdentity {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(default = "default_client_version")]
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
        }
    }
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}
fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        for (name, value) in [
            ("timeouts.request_secs", t.request_secs),
            ("timeouts.handshake_floor_secs", t.handshake_floor_secs),
            ("timeouts.shutdown_grace_secs", t.shutdown_grace_secs),
        ] {
            timeout_from_secs(name, value)?;
        }
        if self.diagnostics.capacity == 0 {
            return Err(super::Error::Config(
                "diagnostics.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default per-request timeout
    pub fn request_timeout(&self) -> Duration {
        secs_or(self.timeouts.request_secs, default_request())
    }

    /// Lower bound for the handshake timeout
    pub fn handshake_floor(&self) -> Duration {
        secs_or(self.timeouts.handshake_floor_secs, default_handshake_floor())
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        secs_or(self.timeouts.shutdown_grace_secs, default_shutdown_grace())
    }
}

/// Longest accepted timeout (one day)
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Convert a timeout given in seconds
///
/// Negative, non-finite and values above [`MAX_TIMEOUT_SECS`] are rejected.
pub fn timeout_from_secs(name: &str, value: f64) -> Result<Duration> {
    if !(0.0..=MAX_TIMEOUT_SECS).contains(&value) {
        return Err(super::Error::Config(format!(
            "{name} must be between 0 and {MAX_TIMEOUT_SECS} seconds, got {value}"
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| super::Error::Config(format!("{name}: invalid duration {value}: {e}")))
}

/// Fields are public, so an unvalidated config falls back to the default
fn secs_or(value: f64, default: f64) -> Duration {
    timeout_from_secs("timeout", value)
        .unwrap_or_else(|_| Duration::from_secs_f64(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.command, "npx -y @satelliteoflove/godot-mcp");
        assert_eq!(config.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.handshake_floor(), Duration::from_secs(45));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.diagnostics.capacity, 200);
        assert_eq!(config.client.name, "mcp-harness");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\ncommand = \"godot-mcp --stdio\"\n\n[timeouts]\nrequest_secs = 2.5"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server.command, "godot-mcp --stdio");
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.diagnostics.capacity, 200);
    }

    #[test]
    fn test_rejects_negative_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts]\nrequest_secs = -1.0").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, crate::common::Error::Config(_)));
    }

    #[test]
    fn test_rejects_huge_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts]\nrequest_secs = 1e30").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, crate::common::Error::Config(_)));
        assert!(err.to_string().contains("timeouts.request_secs"));
    }

    #[test]
    fn test_unvalidated_huge_timeout_falls_back() {
        let mut config = Config::default();
        config.timeouts.request_secs = 1e30;
        config.timeouts.shutdown_grace_secs = f64::NAN;

        assert_eq!(config.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(
            timeout_from_secs("t", 0.25).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            timeout_from_secs("t", MAX_TIMEOUT_SECS).unwrap(),
            Duration::from_secs(86_400)
        );
        assert!(timeout_from_secs("t", MAX_TIMEOUT_SECS + 1.0).is_err());
        assert!(timeout_from_secs("t", -0.5).is_err());
        assert!(timeout_from_secs("t", f64::INFINITY).is_err());
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\ncommand = 1").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }
}
