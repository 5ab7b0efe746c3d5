//! Configuration for agentmux.
//!
//! Loaded from `~/.agentmux/config.toml`. Every key is optional; a missing or
//! unreadable file means defaults.
//!
//! ```toml
//! # Shell for plain sessions (default: $SHELL, then /bin/sh)
//! shell = "/bin/zsh"
//! working_dir = "/home/me/src"
//! max_sessions = 32
//!
//! [terminal]
//! scrollback_limit = 10000
//! close_grace_ms = 3000
//!
//! [scanner]
//! interval_ms = 500
//! scrollback_lines = 0
//! # Empty lists keep the built-in patterns
//! awaiting_patterns = []
//! generating_patterns = []
//!
//! [assistant]
//! command = "claude"
//! autonomous_args = ["--dangerously-skip-permissions"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::term::state::DEFAULT_SCROLLBACK_LIMIT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell for plain sessions
    pub shell: Option<String>,
    /// Working directory when a launch request names none
    pub working_dir: Option<PathBuf>,
    /// Maximum number of registered sessions
    pub max_sessions: usize,
    pub terminal: TerminalConfig,
    pub scanner: ScannerConfig,
    pub assistant: AssistantConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            working_dir: None,
            max_sessions: 32,
            terminal: TerminalConfig::default(),
            scanner: ScannerConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Lines of scrollback kept per session
    pub scrollback_limit: usize,
    /// How long a closing child gets between hang-up and kill
    pub close_grace_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            scrollback_limit: DEFAULT_SCROLLBACK_LIMIT,
            close_grace_ms: 3000,
        }
    }
}

impl TerminalConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval_ms: u64,
    /// Scrollback lines scanned in addition to the visible screen
    pub scrollback_lines: usize,
    pub awaiting_patterns: Vec<String>,
    pub generating_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            scrollback_lines: 0,
            awaiting_patterns: Vec::new(),
            generating_patterns: Vec::new(),
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// The assistant program launched by the assisted modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub command: String,
    /// Appended in autonomous mode
    pub autonomous_args: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            autonomous_args: vec!["--dangerously-skip-permissions".to_string()],
        }
    }
}

impl Config {
    /// Load `~/.agentmux/config.toml`, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// `~/.agentmux`, also home of the log file
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".agentmux"))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.shell, None);
        assert_eq!(config.terminal.scrollback_limit, 10_000);
        assert_eq!(config.terminal.close_grace(), Duration::from_secs(3));
        assert_eq!(config.scanner.interval(), Duration::from_millis(500));
        assert_eq!(config.scanner.scrollback_lines, 0);
        assert_eq!(config.assistant.command, "claude");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            shell = "/bin/zsh"

            [scanner]
            interval_ms = 250
            awaiting_patterns = ["READY>"]
            "#,
        )
        .unwrap();

        assert_eq!(config.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.scanner.interval_ms, 250);
        assert_eq!(config.scanner.awaiting_patterns, vec!["READY>".to_string()]);
        assert!(config.scanner.generating_patterns.is_empty());
        assert_eq!(config.terminal, TerminalConfig::default());
        assert_eq!(config.assistant, AssistantConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_sessions = 4\n[assistant]\ncommand = \"aider\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.assistant.command, "aider");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load_from(&missing), Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "max_sessions = \"many\"").unwrap();
        assert!(matches!(Config::load_from(&bad), Err(ConfigError::Parse { .. })));
    }
}
