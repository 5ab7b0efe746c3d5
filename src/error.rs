//! Error types surfaced by the session engine.

use std::io;

use thiserror::Error;

use crate::core::pty::PtyError;
use crate::core::session::SessionId;

#[derive(Error, Debug)]
pub enum Error {
    /// The child could not be started; no session was registered.
    #[error("Failed to launch session: {0}")]
    Launch(#[source] PtyError),

    /// Write or resize on a session whose PTY is gone.
    #[error("I/O error on session {id}: {source}")]
    Io {
        id: SessionId,
        #[source]
        source: PtyError,
    },

    #[error("No session with id {0}")]
    NotFound(SessionId),

    #[error("Session limit reached ({0})")]
    LimitReached(usize),

    #[error("Invalid scanner pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to start background thread: {0}")]
    Thread(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
