//! Publish/subscribe plumbing between sessions, the scanner and front ends.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::core::session::SessionId;
use crate::scanner::{ActivityState, Usage};
use crate::sync::lock;

/// Fan-out bus: every subscriber gets every event, in publish order.
///
/// Subscribers are unbounded channels; a receiver that has been dropped is
/// pruned on the next publish.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn publish(&self, event: T) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// Session lifecycle and output events.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A chunk of raw PTY output, already applied to the session's screen.
    Output { id: SessionId, bytes: Arc<[u8]> },
    TitleChanged { id: SessionId, title: String },
    /// Emitted at most once per session.
    Exited { id: SessionId, exit_code: Option<u32> },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Output { id, .. }
            | SessionEvent::TitleChanged { id, .. }
            | SessionEvent::Exited { id, .. } => *id,
        }
    }
}

/// An activity state transition seen by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub id: SessionId,
    pub previous: ActivityState,
    pub current: ActivityState,
    /// Latest known usage figures for the session
    pub usage: Usage,
}

impl ActivityEvent {
    /// The program finished generating and went back to idle.
    pub fn is_response_complete(&self) -> bool {
        self.previous == ActivityState::Generating && self.current == ActivityState::Idle
    }
}
