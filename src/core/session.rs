//! Session management
//!
//! A session owns one child process on a PTY plus the [`Screen`] its output
//! is parsed into. A dedicated reader thread is the only writer of the
//! screen; everything else reads it through snapshots.

use std::io::Read;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::pty::{self, Pty, PtyCommand, PtyError, PtyReader};
use super::term::{rows_to_text, GridSnapshot, Screen};
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::launch::{LaunchDescriptor, LaunchMode};
use crate::sync::{lock, read, write};

/// Session identifier, never reused within a process
pub type SessionId = u64;

const READ_BUFFER_SIZE: usize = 8192;
/// How long the reader waits for an exit code after end of stream
const EXIT_CODE_WAIT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How often the exit watcher asks whether the child is gone
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// After the child exits, how long the reader gets to drain and hit EOF
const OUTPUT_DRAIN_WAIT: Duration = Duration::from_millis(500);
/// Upper bound on waiting for a session thread in `close`
const THREAD_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub scrollback_limit: usize,
    pub close_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            scrollback_limit: super::term::state::DEFAULT_SCROLLBACK_LIMIT,
            close_grace: Duration::from_secs(3),
        }
    }
}

#[derive(Default)]
struct ExitState {
    terminated: bool,
    exit_code: Option<u32>,
}

/// Running/terminated bookkeeping shared by the reader thread and `close`.
///
/// Output and exit events are published under the same lock, so no output
/// event can follow the exit event.
struct Lifecycle {
    id: SessionId,
    running: AtomicBool,
    exit: Mutex<ExitState>,
    events: Arc<EventBus<SessionEvent>>,
}

impl Lifecycle {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> Option<u32> {
        lock(&self.exit).exit_code
    }

    fn publish(&self, event: SessionEvent) {
        let exit = lock(&self.exit);
        if !exit.terminated {
            self.events.publish(event);
        }
    }

    /// Mark terminated and publish `Exited`. Only the first call has an effect.
    fn terminate(&self, exit_code: Option<u32>) {
        let mut exit = lock(&self.exit);
        if exit.terminated {
            return;
        }
        exit.terminated = true;
        exit.exit_code = exit_code;
        self.running.store(false, Ordering::SeqCst);
        info!(id = self.id, ?exit_code, "session terminated");
        self.events.publish(SessionEvent::Exited {
            id: self.id,
            exit_code,
        });
    }
}

/// A child process bound to a PTY
pub struct Session {
    id: SessionId,
    descriptor: LaunchDescriptor,
    screen: Arc<RwLock<Screen>>,
    pty: Arc<dyn Pty>,
    lifecycle: Arc<Lifecycle>,
    close_grace: Duration,
    closed: AtomicBool,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    exit_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Spawn `command` on a new PTY and start reading its output.
    pub fn start(
        id: SessionId,
        command: &PtyCommand,
        descriptor: LaunchDescriptor,
        cols: u16,
        rows: u16,
        options: SessionOptions,
        events: Arc<EventBus<SessionEvent>>,
    ) -> Result<Arc<Session>> {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let (pty, reader) = pty::open(command, cols, rows).map_err(Error::Launch)?;
        let pty: Arc<dyn Pty> = Arc::from(pty);

        let screen = Arc::new(RwLock::new(Screen::with_scrollback(
            cols,
            rows,
            options.scrollback_limit,
        )));
        let lifecycle = Arc::new(Lifecycle {
            id,
            running: AtomicBool::new(true),
            exit: Mutex::new(ExitState::default()),
            events,
        });

        let reader_thread = {
            let screen = Arc::clone(&screen);
            let pty = Arc::clone(&pty);
            let lifecycle = Arc::clone(&lifecycle);
            thread::Builder::new()
                .name(format!("pty-read-{id}"))
                .spawn(move || read_loop(reader, &screen, pty.as_ref(), &lifecycle))
        };
        let reader_thread = match reader_thread {
            Ok(handle) => handle,
            Err(e) => {
                let _ = pty.close(Duration::ZERO);
                return Err(Error::Thread(e));
            }
        };

        let exit_watcher = {
            let pty = Arc::clone(&pty);
            let lifecycle = Arc::clone(&lifecycle);
            thread::Builder::new()
                .name(format!("pty-wait-{id}"))
                .spawn(move || watch_exit(pty.as_ref(), &lifecycle))
        };
        let exit_watcher = match exit_watcher {
            Ok(handle) => handle,
            Err(e) => {
                let _ = pty.close(Duration::ZERO);
                lifecycle.terminate(pty.try_wait());
                let _ = reader_thread.join();
                return Err(Error::Thread(e));
            }
        };

        info!(
            id,
            program = %command.program,
            cwd = %command.cwd.display(),
            mode = descriptor.mode.name(),
            pid = ?pty.process_id(),
            "session started"
        );

        Ok(Arc::new(Session {
            id,
            descriptor,
            screen,
            pty,
            lifecycle,
            close_grace: options.close_grace,
            closed: AtomicBool::new(false),
            reader_thread: Mutex::new(Some(reader_thread)),
            exit_watcher: Mutex::new(Some(exit_watcher)),
        }))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn descriptor(&self) -> &LaunchDescriptor {
        &self.descriptor
    }

    pub fn mode(&self) -> LaunchMode {
        self.descriptor.mode
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pty.process_id()
    }

    /// Check if session is running
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Exit code, once terminated and if the platform reported one
    pub fn exit_code(&self) -> Option<u32> {
        self.lifecycle.exit_code()
    }

    /// (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        read(&self.screen).size()
    }

    /// Get the terminal title
    pub fn title(&self) -> String {
        read(&self.screen).title().to_string()
    }

    /// Write input to the PTY
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        self.pty
            .write(data)
            .map_err(|source| Error::Io { id: self.id, source })
    }

    /// Resize the PTY and the screen. Dimensions are clamped to 1x1.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.ensure_alive()?;
        let cols = cols.max(1);
        let rows = rows.max(1);
        self.pty
            .resize(cols, rows)
            .map_err(|source| Error::Io { id: self.id, source })?;
        write(&self.screen).resize(cols, rows);
        Ok(())
    }

    /// Terminate the child and release the PTY. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(id = self.id, "closing session");

        let closed = self
            .pty
            .close(self.close_grace)
            .map_err(|source| Error::Io { id: self.id, source });

        if let Some(handle) = lock(&self.reader_thread).take() {
            join_within(self.id, handle, THREAD_JOIN_TIMEOUT);
        }
        self.lifecycle.terminate(self.pty.try_wait());
        if let Some(handle) = lock(&self.exit_watcher).take() {
            join_within(self.id, handle, THREAD_JOIN_TIMEOUT);
        }
        closed
    }

    pub fn render(&self) -> GridSnapshot {
        read(&self.screen).render()
    }

    pub fn render_region(&self, rows: Range<u16>) -> GridSnapshot {
        read(&self.screen).render_region(rows)
    }

    pub fn plain_text(&self) -> String {
        read(&self.screen).plain_text()
    }

    pub fn transcript(&self) -> String {
        read(&self.screen).transcript()
    }

    /// Text the activity scanner looks at: the last `scrollback_lines` of
    /// history plus the visible screen.
    pub fn scan_text(&self, scrollback_lines: usize) -> String {
        let rows = read(&self.screen).recent_rows(scrollback_lines);
        rows_to_text(&rows)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || !self.lifecycle.is_running() {
            return Err(Error::Io {
                id: self.id,
                source: PtyError::Closed,
            });
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(id = self.id, error = %e, "close on drop failed");
        }
    }
}

/// Join `handle`, or leave it detached once `timeout` has passed.
fn join_within(id: SessionId, handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        warn!(id, thread = ?handle.thread().name(), "session thread did not stop in time");
    }
}

/// Terminate the session when the child exits, even if a descendant still
/// holds the PTY open and the reader never sees end of stream.
fn watch_exit(pty: &dyn Pty, lifecycle: &Lifecycle) {
    let exit_code = loop {
        if !lifecycle.is_running() {
            return;
        }
        if let Some(code) = pty.try_wait() {
            break code;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    };

    let deadline = Instant::now() + OUTPUT_DRAIN_WAIT;
    while lifecycle.is_running() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    if lifecycle.is_running() {
        debug!(id = lifecycle.id, exit_code, "child exited with the pty still open");
    }
    lifecycle.terminate(Some(exit_code));
}

fn read_loop(mut reader: PtyReader, screen: &RwLock<Screen>, pty: &dyn Pty, lifecycle: &Lifecycle) {
    let id = lifecycle.id;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => {
                debug!(id, "pty reached end of stream");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO on Linux once the child side is gone
                debug!(id, error = %e, "pty read failed");
                break;
            }
        };
        let chunk = &buffer[..n];

        let (responses, title) = {
            let mut screen = write(screen);
            screen.write(chunk);
            (screen.take_responses(), screen.take_title_change())
        };

        for response in responses {
            if let Err(e) = pty.write(&response.to_bytes()) {
                warn!(id, error = %e, "failed to answer terminal query");
            }
        }

        lifecycle.publish(SessionEvent::Output {
            id,
            bytes: Arc::from(chunk),
        });
        if let Some(title) = title {
            lifecycle.publish(SessionEvent::TitleChanged { id, title });
        }
    }

    let deadline = Instant::now() + EXIT_CODE_WAIT;
    let mut exit_code = pty.try_wait();
    while exit_code.is_none() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
        exit_code = pty.try_wait();
    }
    lifecycle.terminate(exit_code);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::term::Color;
    use crossbeam_channel::Receiver;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn start_sh(script: &str, events: &Arc<EventBus<SessionEvent>>) -> Arc<Session> {
        let command = PtyCommand::new("/bin/sh", "/").arg("-c").arg(script);
        let descriptor = LaunchDescriptor {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: PathBuf::from("/"),
            mode: LaunchMode::Shell,
        };
        let options = SessionOptions {
            close_grace: Duration::from_millis(300),
            ..SessionOptions::default()
        };
        Session::start(1, &command, descriptor, 80, 24, options, Arc::clone(events)).expect("start session")
    }

    /// Collect events until `Exited`, failing after a deadline.
    fn wait_for_exit(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
                let done = matches!(event, SessionEvent::Exited { .. });
                events.push(event);
                if done {
                    break;
                }
            }
        }
        events
    }

    #[test]
    fn test_output_reaches_screen() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let session = start_sh("printf 'hello '; printf '\\033[31mworld'", &events);

        let seen = wait_for_exit(&rx);
        assert!(matches!(seen.last(), Some(SessionEvent::Exited { id: 1, .. })));

        assert_eq!(session.plain_text(), "hello world");
        let grid = session.render();
        let w = grid.cell(0, 6).expect("cell");
        assert_eq!(w.grapheme, "w");
        assert_eq!(w.attrs.fg, Color::Indexed(1));
        assert_eq!(grid.cell(0, 0).map(|c| c.attrs.fg), Some(Color::Default));
    }

    #[test]
    fn test_single_exit_event_and_write_after_exit() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let session = start_sh("exit 3", &events);

        wait_for_exit(&rx);
        assert!(!session.is_running());
        assert_eq!(session.exit_code(), Some(3));

        assert!(matches!(session.write(b"ls\n"), Err(Error::Io { id: 1, .. })));
        session.close().unwrap();
        session.close().unwrap();

        thread::sleep(Duration::from_millis(100));
        let late: Vec<_> = rx.try_iter().collect();
        assert!(
            late.iter().all(|e| !matches!(e, SessionEvent::Exited { .. })),
            "extra events: {late:?}"
        );
    }

    #[test]
    fn test_close_running_session() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let session = start_sh("while :; do sleep 1; done", &events);
        assert!(session.is_running());

        session.close().unwrap();
        assert!(!session.is_running());

        let exits = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::Exited { .. }))
            .count();
        assert_eq!(exits, 1);
    }

    #[test]
    fn test_exit_seen_while_descendant_holds_pty() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let session = start_sh("(trap '' HUP; exec sleep 20) & echo started; exit 0", &events);

        let seen = wait_for_exit(&rx);
        assert!(
            matches!(seen.last(), Some(SessionEvent::Exited { id: 1, exit_code: Some(0) })),
            "events: {seen:?}"
        );
        assert!(!session.is_running());
        assert!(matches!(session.write(b"x"), Err(Error::Io { id: 1, .. })));

        // The sleeper still holds the slave side; close must not wait on it
        let started = Instant::now();
        session.close().unwrap();
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(Arc::strong_count(&session.screen), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_close_joins_reader_despite_detached_descendant() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let session = start_sh("setsid sleep 20 & echo ready; sleep 30", &events);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !session.plain_text().contains("ready") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }

        let started = Instant::now();
        session.close().unwrap();
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(Arc::strong_count(&session.screen), 1);
        assert!(lock(&session.reader_thread).is_none());

        let exits = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::Exited { .. }))
            .count();
        assert_eq!(exits, 1);
    }

    #[test]
    fn test_resize_and_title() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let session = start_sh("printf '\\033]0;build\\007'; sleep 5", &events);

        session.resize(0, 30).unwrap();
        assert_eq!(session.size(), (1, 30));
        session.resize(100, 30).unwrap();
        assert_eq!(session.size(), (100, 30));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut title = None;
        while title.is_none() && Instant::now() < deadline {
            if let Ok(SessionEvent::TitleChanged { title: t, .. }) = rx.recv_timeout(Duration::from_millis(100)) {
                title = Some(t);
            }
        }
        assert_eq!(title.as_deref(), Some("build"));
        assert_eq!(session.title(), "build");
        session.close().unwrap();
    }
}
