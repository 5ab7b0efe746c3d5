//! Core terminal emulation components.
//!
//! This module contains the low-level session engine:
//!
//! - **pty**: pseudo-terminal backends (portable-pty on Unix, ConPTY on Windows)
//! - **term**: VT100/VT220 terminal state and ANSI escape sequence parser
//! - **session**: High-level session combining PTY + screen + reader thread
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Pty (child process I/O, resize, termination)
//! ├── reader thread (pty-read-{id})
//! └── Screen (behind RwLock)
//!     ├── TerminalState (grid + scrollback + cursor + modes)
//!     └── VtParser (ANSI escape sequences)
//! ```

pub mod pty;
pub mod session;
pub mod term;
