//! Launch requests and their resolution against configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::pty::{default_shell, PtyCommand};

/// What kind of program a session runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMode {
    /// The user's shell
    #[default]
    Shell,
    /// The configured assistant program
    Assisted,
    /// The assistant with its autonomous arguments appended
    AssistedAutonomous,
}

impl LaunchMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "shell" => Some(Self::Shell),
            "assist" | "assisted" => Some(Self::Assisted),
            "auto" | "autonomous" | "assisted-autonomous" => Some(Self::AssistedAutonomous),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Assisted => "assisted",
            Self::AssistedAutonomous => "assisted-autonomous",
        }
    }
}

/// A request to start a session. Unset fields come from configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub mode: LaunchMode,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            working_dir: None,
            cols: 80,
            rows: 24,
            mode: LaunchMode::Shell,
        }
    }
}

impl LaunchSpec {
    pub fn new(mode: LaunchMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Fill in defaults from `config` and build the child command.
    pub fn resolve(&self, config: &Config) -> (PtyCommand, LaunchDescriptor) {
        let program = match (&self.command, self.mode) {
            (Some(command), _) => command.clone(),
            (None, LaunchMode::Shell) => config.shell.clone().unwrap_or_else(default_shell),
            (None, _) => config.assistant.command.clone(),
        };

        let working_dir = self
            .working_dir
            .clone()
            .or_else(|| config.working_dir.clone())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut command = PtyCommand::new(program.clone(), working_dir.clone())
            .args(self.args.iter().cloned())
            .env("TERM", "xterm-256color")
            .env("AGENTMUX", "1")
            .env("AGENTMUX_VERSION", env!("CARGO_PKG_VERSION"));
        if self.mode == LaunchMode::AssistedAutonomous {
            command = command.args(config.assistant.autonomous_args.iter().cloned());
        }

        let descriptor = LaunchDescriptor {
            command: program,
            args: self.args.clone(),
            working_dir,
            mode: self.mode,
        };
        (command, descriptor)
    }
}

/// Reconstructable launch parameters, handed to whoever persists layouts.
///
/// `args` holds only the caller's arguments; mode-specific arguments are
/// re-derived on relaunch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub mode: LaunchMode,
}

impl LaunchDescriptor {
    pub fn to_spec(&self, cols: u16, rows: u16) -> LaunchSpec {
        LaunchSpec {
            command: Some(self.command.clone()),
            args: self.args.clone(),
            working_dir: Some(self.working_dir.clone()),
            cols,
            rows,
            mode: self.mode,
        }
    }
}
