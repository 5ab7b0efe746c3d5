//! Session registry
//!
//! Owns every live session, routes input and resizes to them, runs the shared
//! activity scanner and fans events out to subscribers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::session::{Session, SessionId, SessionOptions};
use crate::core::term::GridSnapshot;
use crate::error::{Error, Result};
use crate::events::{ActivityEvent, EventBus, SessionEvent};
use crate::launch::{LaunchDescriptor, LaunchMode, LaunchSpec};
use crate::scanner::{ActivityStatus, ActivityTracker, PatternSet, Scanner};
use crate::sync::{lock, read, write};

/// Summary of one registered session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub mode: LaunchMode,
    pub command: String,
    pub working_dir: PathBuf,
    pub running: bool,
    pub exit_code: Option<u32>,
    pub title: String,
}

struct Entry {
    session: Arc<Session>,
    tracker: Mutex<ActivityTracker>,
}

struct RegistryInner {
    config: Config,
    patterns: PatternSet,
    sessions: RwLock<HashMap<SessionId, Arc<Entry>>>,
    next_id: AtomicU64,
    /// Creates that passed the limit check and are still spawning
    pending: AtomicUsize,
    session_events: Arc<EventBus<SessionEvent>>,
    activity_events: EventBus<ActivityEvent>,
}

impl RegistryInner {
    fn entry(&self, id: SessionId) -> Result<Arc<Entry>> {
        read(&self.sessions).get(&id).cloned().ok_or(Error::NotFound(id))
    }

    fn entries(&self) -> Vec<Arc<Entry>> {
        read(&self.sessions).values().cloned().collect()
    }

    /// One scanner tick over every session. A terminated session gets one
    /// last pass that settles it on idle.
    fn scan(&self) {
        let scrollback_lines = self.config.scanner.scrollback_lines;
        for entry in self.entries() {
            let session = &entry.session;
            let running = session.is_running();
            if !running && lock(&entry.tracker).is_finished() {
                continue;
            }
            let text = session.scan_text(scrollback_lines);

            // Held while publishing so one session's transitions stay ordered
            let mut tracker = lock(&entry.tracker);
            let transition = if running {
                tracker.observe(&text, &self.patterns)
            } else {
                tracker.finish(&text)
            };
            if let Some((previous, current)) = transition {
                debug!(id = session.id(), ?previous, ?current, "activity changed");
                self.activity_events.publish(ActivityEvent {
                    id: session.id(),
                    previous,
                    current,
                    usage: tracker.status().usage.clone(),
                });
            }
        }
    }
}

/// The set of live sessions, keyed by id
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    scanner: Mutex<Option<Scanner>>,
}

impl SessionRegistry {
    /// Build a registry and start its scanner thread.
    pub fn new(config: Config) -> Result<Self> {
        let patterns = PatternSet::from_config(&config.scanner)?;
        let interval = config.scanner.interval();
        let inner = Arc::new(RegistryInner {
            config,
            patterns,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pending: AtomicUsize::new(0),
            session_events: Arc::new(EventBus::new()),
            activity_events: EventBus::new(),
        });

        let weak: Weak<RegistryInner> = Arc::downgrade(&inner);
        let scanner = Scanner::spawn(interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.scan();
            }
        })
        .map_err(Error::Thread)?;

        Ok(Self {
            inner,
            scanner: Mutex::new(Some(scanner)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Launch a session and register it.
    pub fn create(&self, spec: LaunchSpec) -> Result<SessionId> {
        let (command, descriptor) = spec.resolve(&self.inner.config);
        let options = SessionOptions {
            scrollback_limit: self.inner.config.terminal.scrollback_limit,
            close_grace: self.inner.config.terminal.close_grace(),
        };

        // Reserve a slot; the spawn itself runs without the map lock
        let limit = self.inner.config.max_sessions;
        {
            let sessions = write(&self.inner.sessions);
            let pending = &self.inner.pending;
            if sessions.len() + pending.load(Ordering::SeqCst) >= limit {
                return Err(Error::LimitReached(limit));
            }
            pending.fetch_add(1, Ordering::SeqCst);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let started = Session::start(
            id,
            &command,
            descriptor,
            spec.cols,
            spec.rows,
            options,
            Arc::clone(&self.inner.session_events),
        );

        let mut sessions = write(&self.inner.sessions);
        self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        let session = started?;
        sessions.insert(
            id,
            Arc::new(Entry {
                session,
                tracker: Mutex::new(ActivityTracker::new()),
            }),
        );
        info!(id, count = sessions.len(), "session registered");
        Ok(id)
    }

    /// Close a session and drop it from the registry.
    pub fn remove(&self, id: SessionId) -> Result<()> {
        let entry = write(&self.inner.sessions)
            .remove(&id)
            .ok_or(Error::NotFound(id))?;
        info!(id, "session removed");
        entry.session.close()
    }

    /// Forward input bytes to a session.
    pub fn route(&self, id: SessionId, bytes: &[u8]) -> Result<()> {
        self.inner.entry(id)?.session.write(bytes)
    }

    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<()> {
        self.inner.entry(id)?.session.resize(cols, rows)
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.entry(id).ok().map(|entry| Arc::clone(&entry.session))
    }

    pub fn snapshot(&self, id: SessionId) -> Result<GridSnapshot> {
        Ok(self.inner.entry(id)?.session.render())
    }

    pub fn plain_text(&self, id: SessionId) -> Result<String> {
        Ok(self.inner.entry(id)?.session.plain_text())
    }

    /// Last scanned activity state and usage.
    pub fn activity(&self, id: SessionId) -> Result<ActivityStatus> {
        let entry = self.inner.entry(id)?;
        let status = lock(&entry.tracker).status().clone();
        Ok(status)
    }

    /// All sessions, ordered by id
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .inner
            .entries()
            .iter()
            .map(|entry| {
                let session = &entry.session;
                let (cols, rows) = session.size();
                let descriptor = session.descriptor();
                SessionInfo {
                    id: session.id(),
                    cols,
                    rows,
                    mode: descriptor.mode,
                    command: descriptor.command.clone(),
                    working_dir: descriptor.working_dir.clone(),
                    running: session.is_running(),
                    exit_code: session.exit_code(),
                    title: session.title(),
                }
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Launch parameters for persisting a session.
    pub fn describe(&self, id: SessionId) -> Result<LaunchDescriptor> {
        Ok(self.inner.entry(id)?.session.descriptor().clone())
    }

    pub fn describe_all(&self) -> Vec<(SessionId, LaunchDescriptor)> {
        let mut all: Vec<_> = self
            .inner
            .entries()
            .iter()
            .map(|entry| (entry.session.id(), entry.session.descriptor().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn len(&self) -> usize {
        read(&self.inner.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe_sessions(&self) -> Receiver<SessionEvent> {
        self.inner.session_events.subscribe()
    }

    pub fn subscribe_activity(&self) -> Receiver<ActivityEvent> {
        self.inner.activity_events.subscribe()
    }

    /// Run one scan immediately instead of waiting for the next tick.
    pub fn scan_now(&self) {
        self.inner.scan();
    }

    /// Stop scanning and close every session.
    pub fn shutdown(&self) {
        if let Some(mut scanner) = lock(&self.scanner).take() {
            scanner.stop();
        }

        let entries: Vec<Arc<Entry>> = write(&self.inner.sessions).drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "shutting down sessions");

        // Each close may sit out a grace period, so run them side by side
        thread::scope(|scope| {
            for entry in &entries {
                scope.spawn(move || {
                    if let Err(e) = entry.session.close() {
                        warn!(id = entry.session.id(), error = %e, "close failed");
                    }
                });
            }
        });
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
