//! VT100/ANSI terminal emulation.
//!
//! - **parser**: byte stream to actions (explicit state + transition table)
//! - **state**: grid, scrollback, cursor, modes
//! - **dispatch**: applies actions to the state, produces terminal replies
//! - **screen**: parser + state with snapshot and text views

mod dispatch;
pub mod parser;
pub mod screen;
pub mod state;

pub use dispatch::Response;
pub use screen::{CursorSnapshot, GridSnapshot, Screen};
pub use state::{rows_to_text, AttrFlags, Cell, CellAttrs, Color, CursorShape, Row};
