//! Pseudo-terminal backends
//!
//! The rest of the crate talks to a child process through the [`Pty`] trait
//! and the blocking reader returned by [`open`]; it never branches on the
//! platform. Unix uses `portable-pty` with process-group signals, Windows
//! drives ConPTY directly.

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[cfg(windows)]
mod conpty;
#[cfg(unix)]
mod unix;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo terminal: {0}")]
    Open(String),

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Working directory does not exist: {}", .0.display())]
    WorkingDir(PathBuf),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(String),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),

    #[error("PTY is closed")]
    Closed,

    #[cfg(windows)]
    #[error("Windows API call failed: {0}")]
    Os(#[source] windows::core::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Blocking reader over the child's output. Returns `Ok(0)` once the child
/// side is gone.
pub type PtyReader = Box<dyn Read + Send>;

/// A fully resolved child command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added to (or overriding) the inherited environment
    pub env: Vec<(String, String)>,
}

impl PtyCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Capability interface over a platform PTY plus its child process.
///
/// All methods take `&self` so a session can share the handle between the
/// reader thread and callers; implementations serialize internally.
pub trait Pty: Send + Sync {
    /// Write raw bytes to the child's input.
    fn write(&self, data: &[u8]) -> Result<()>;

    fn resize(&self, cols: u16, rows: u16) -> Result<()>;

    /// Exit code if the child has exited. Never blocks.
    fn try_wait(&self) -> Option<u32>;

    fn process_id(&self) -> Option<u32>;

    /// Ask the child to exit, then force it once `grace` has elapsed.
    fn terminate(&self, grace: Duration);

    /// Terminate the child if needed and release the PTY. Idempotent.
    fn close(&self, grace: Duration) -> Result<()>;
}

/// Allocate a PTY of the given size and spawn `command` on it.
pub fn open(command: &PtyCommand, cols: u16, rows: u16) -> Result<(Box<dyn Pty>, PtyReader)> {
    if !command.cwd.is_dir() {
        return Err(PtyError::WorkingDir(command.cwd.clone()));
    }
    let cols = cols.max(1);
    let rows = rows.max(1);

    #[cfg(unix)]
    {
        unix::UnixPty::open(command, cols, rows)
    }
    #[cfg(windows)]
    {
        conpty::ConPty::open(command, cols, rows)
    }
}

/// The user's shell: `$SHELL`, falling back to `/bin/sh`.
#[cfg(unix)]
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// The user's shell: `%COMSPEC%`, falling back to `cmd.exe`.
#[cfg(windows)]
pub fn default_shell() -> String {
    std::env::var("COMSPEC")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "cmd.exe".to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn read_until(reader: &mut PtyReader, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&collected).contains(needle) {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[test]
    fn test_spawn_and_read() {
        let command = PtyCommand::new("/bin/sh", "/")
            .arg("-c")
            .arg("printf \"$AGENTMUX_TEST\"")
            .env("AGENTMUX_TEST", "pty-ok");
        let (pty, mut reader) = open(&command, 80, 24).expect("open pty");
        assert!(pty.process_id().is_some());

        let output = read_until(&mut reader, "pty-ok", Duration::from_secs(5));
        assert!(output.contains("pty-ok"), "output was {output:?}");
        pty.close(Duration::from_millis(500)).expect("close");
    }

    #[test]
    fn test_missing_working_dir() {
        let command = PtyCommand::new("/bin/sh", "/definitely/not/a/dir");
        match open(&command, 80, 24) {
            Err(PtyError::WorkingDir(path)) => assert_eq!(path, PathBuf::from("/definitely/not/a/dir")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("open should fail"),
        }
    }

    #[test]
    fn test_missing_program() {
        let command = PtyCommand::new("/definitely/not/a/program", "/");
        assert!(open(&command, 80, 24).is_err());
    }

    #[test]
    fn test_close_kills_stubborn_child() {
        // The child ignores SIGHUP, so close has to escalate
        let command = PtyCommand::new("/bin/sh", "/")
            .arg("-c")
            .arg("trap '' HUP; echo ready; while :; do sleep 1; done");
        let (pty, mut reader) = open(&command, 80, 24).expect("open pty");
        read_until(&mut reader, "ready", Duration::from_secs(5));

        let started = Instant::now();
        pty.close(Duration::from_millis(300)).expect("close");
        assert!(started.elapsed() < Duration::from_secs(5));

        let deadline = Instant::now() + Duration::from_secs(5);
        while pty.try_wait().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(pty.try_wait().is_some());
        assert!(matches!(pty.write(b"x"), Err(PtyError::Closed)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_close_unblocks_reader_held_open_by_descendant() {
        // The setsid sleeper leaves the child's process group, survives
        // close and keeps the slave side open
        let command = PtyCommand::new("/bin/sh", "/")
            .arg("-c")
            .arg("setsid sleep 20 & echo ready; sleep 30");
        let (pty, mut reader) = open(&command, 80, 24).expect("open pty");
        read_until(&mut reader, "ready", Duration::from_secs(5));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
            let _ = done_tx.send(());
        });

        pty.close(Duration::from_millis(300)).expect("close");
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
