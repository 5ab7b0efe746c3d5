//! Unix PTY backend on top of `portable-pty`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{pipe, Pid};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use super::{Pty, PtyCommand, PtyError, PtyReader, Result};
use crate::sync::lock;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct UnixPty {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    /// Write end of the reader's wake pipe; dropping it ends the reader
    wake: Mutex<Option<OwnedFd>>,
}

/// Reader over a private duplicate of the master fd.
///
/// A descendant that outlives the child can keep the slave side open, so a
/// plain blocking read might never see EOF. Every read first polls the
/// master together with a wake pipe; once the pipe's write end is dropped
/// the reader reports end of stream.
struct UnixPtyReader {
    master: File,
    wake: OwnedFd,
}

impl Read for UnixPtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (readable, woken) = {
                let mut fds = [
                    PollFd::new(self.master.as_fd(), PollFlags::POLLIN),
                    PollFd::new(self.wake.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(io::Error::from(e)),
                }
                let ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| !r.is_empty());
                (ready(&fds[0]), ready(&fds[1]))
            };
            if woken {
                return Ok(0);
            }
            if readable {
                return self.master.read(buf);
            }
        }
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl UnixPty {
    pub fn open(command: &PtyCommand, cols: u16, rows: u16) -> Result<(Box<dyn Pty>, PtyReader)> {
        let pair = native_pty_system()
            .openpty(pty_size(cols, rows))
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        cmd.cwd(&command.cwd);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| PtyError::Spawn {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;
        // Only the child may hold the slave, so the reader sees EOF when it exits
        drop(pair.slave);

        let raw_master = pair
            .master
            .as_raw_fd()
            .ok_or_else(|| PtyError::Open("pty master has no file descriptor".to_string()))?;
        // Safety: the fd belongs to `pair.master`, which is alive here; the
        // reader gets its own duplicate.
        let master = unsafe { BorrowedFd::borrow_raw(raw_master) }
            .try_clone_to_owned()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let (wake_read, wake_write) = pipe().map_err(|e| PtyError::Open(e.to_string()))?;
        let reader = UnixPtyReader {
            master: File::from(master),
            wake: wake_read,
        };
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let pid = child.process_id();
        debug!(?pid, program = %command.program, "spawned child on pty");

        let pty = UnixPty {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            pid,
            wake: Mutex::new(Some(wake_write)),
        };
        Ok((Box::new(pty), Box::new(reader)))
    }

    fn signal(&self, signal: Signal) {
        let Some(pid) = self.pid else {
            return;
        };
        let pid = Pid::from_raw(pid as i32);
        // The child leads its own session, so its process group carries
        // everything it started.
        if killpg(pid, signal).is_err() {
            if let Err(e) = kill(pid, signal) {
                debug!(%pid, ?signal, error = %e, "failed to signal child");
            }
        }
    }
}

impl Pty for UnixPty {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(PtyError::Closed)?;
        writer.write_all(data).map_err(PtyError::Write)?;
        writer.flush().map_err(PtyError::Write)
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = lock(&self.master);
        let master = guard.as_ref().ok_or(PtyError::Closed)?;
        master
            .resize(pty_size(cols.max(1), rows.max(1)))
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    fn try_wait(&self) -> Option<u32> {
        match lock(&self.child).try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "try_wait failed");
                None
            }
        }
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, grace: Duration) {
        if self.try_wait().is_some() {
            return;
        }

        self.signal(Signal::SIGHUP);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.try_wait().is_some() {
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(pid = ?self.pid, "child still running after hang-up, killing");
        self.signal(Signal::SIGKILL);
        if let Err(e) = lock(&self.child).kill() {
            debug!(error = %e, "kill failed");
        }
    }

    fn close(&self, grace: Duration) -> Result<()> {
        lock(&self.writer).take();
        self.terminate(grace);
        lock(&self.wake).take();
        lock(&self.master).take();
        Ok(())
    }
}
