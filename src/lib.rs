//! agentmux - a session engine for running shells and AI coding assistants
//! side by side on pseudo terminals.
//!
//! The library owns the hard parts and leaves presentation to its caller:
//!
//! - **Terminal emulation** ([`core::term`]): a VT100/xterm parser feeding a
//!   character/attribute grid with scrollback, alternate screen and wide
//!   character handling.
//! - **PTY sessions** ([`core::session`], [`core::pty`]): one child process
//!   per session, a reader thread per PTY, graceful close with escalation.
//! - **Activity scanning** ([`scanner`]): classifies each session as idle,
//!   generating or awaiting input from its rendered text, and extracts cost
//!   and token figures.
//! - **Registry** ([`registry`]): keyed sessions, input routing, and event
//!   fan-out through [`events::EventBus`].
//!
//! ```no_run
//! use agentmux::{Config, LaunchMode, LaunchSpec, SessionRegistry};
//!
//! # fn main() -> agentmux::Result<()> {
//! let registry = SessionRegistry::new(Config::load())?;
//! let output = registry.subscribe_sessions();
//! let id = registry.create(LaunchSpec::new(LaunchMode::Shell).size(120, 40))?;
//! registry.route(id, b"echo hi\n")?;
//! for event in output.iter().take(4) {
//!     println!("{event:?}");
//! }
//! println!("{}", registry.plain_text(id)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod launch;
pub mod registry;
pub mod scanner;
mod sync;

pub use config::Config;
pub use crate::core::session::{Session, SessionId};
pub use crate::core::term::{GridSnapshot, Screen};
pub use error::{Error, Result};
pub use events::{ActivityEvent, EventBus, SessionEvent};
pub use launch::{LaunchDescriptor, LaunchMode, LaunchSpec};
pub use registry::{SessionInfo, SessionRegistry};
pub use scanner::{ActivityState, ActivityStatus, Usage};
