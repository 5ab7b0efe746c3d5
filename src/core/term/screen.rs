//! The emulated screen of one session: parser plus terminal state, with
//! read-only views for renderers and the activity scanner.

use std::ops::Range;

use super::dispatch::Response;
use super::parser::{Action, ParserState, VtParser};
use super::state::{rows_to_text, Cell, CursorShape, Row, TerminalState, DEFAULT_SCROLLBACK_LIMIT};

/// Point-in-time copy of (part of) the visible grid.
#[derive(Clone, Debug, PartialEq)]
pub struct GridSnapshot {
    pub cols: u16,
    pub rows: u16,
    /// Screen row of `lines[0]`
    pub first_row: u16,
    pub lines: Vec<Row>,
    pub cursor: CursorSnapshot,
    pub alternate: bool,
    pub title: String,
}

impl GridSnapshot {
    /// Cell at a screen position, if it is inside the snapshot.
    pub fn cell(&self, row: u16, col: u16) -> Option<&Cell> {
        let index = row.checked_sub(self.first_row)? as usize;
        self.lines.get(index)?.cells.get(col as usize)
    }

    pub fn plain_text(&self) -> String {
        rows_to_text(&self.lines)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
    pub shape: CursorShape,
}

/// Parser and terminal state for one session.
pub struct Screen {
    parser: VtParser,
    state: TerminalState,
    responses: Vec<Response>,
    reported_title: String,
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_scrollback(cols, rows, DEFAULT_SCROLLBACK_LIMIT)
    }

    pub fn with_scrollback(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self {
            parser: VtParser::new(),
            state: TerminalState::new(cols, rows, scrollback_limit),
            responses: Vec::new(),
            reported_title: String::new(),
        }
    }

    /// Feed raw PTY output. Never fails; malformed input is dropped.
    pub fn write(&mut self, bytes: &[u8]) {
        let state = &mut self.state;
        let responses = &mut self.responses;
        self.parser.feed(bytes, &mut |action: Action<'_>| {
            if let Some(response) = state.perform(action) {
                responses.push(response);
            }
        });
    }

    /// Replies queued by terminal queries since the last call.
    pub fn take_responses(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.responses)
    }

    /// The new title if it changed since the last call.
    pub fn take_title_change(&mut self) -> Option<String> {
        if self.state.title == self.reported_title {
            return None;
        }
        self.reported_title.clone_from(&self.state.title);
        Some(self.reported_title.clone())
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.state.resize(cols, rows);
    }

    /// (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        (self.state.cols, self.state.rows)
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    pub fn parser_state(&self) -> ParserState {
        self.parser.state()
    }

    pub fn cursor(&self) -> CursorSnapshot {
        let cursor = self.state.active_cursor();
        CursorSnapshot {
            row: cursor.row,
            col: cursor.col.min(self.state.cols - 1),
            visible: cursor.visible,
            shape: cursor.shape,
        }
    }

    pub fn render(&self) -> GridSnapshot {
        self.render_region(0..self.state.rows)
    }

    /// Snapshot of the given screen rows, clamped to the grid.
    pub fn render_region(&self, rows: Range<u16>) -> GridSnapshot {
        let end = rows.end.min(self.state.rows);
        let start = rows.start.min(end);
        GridSnapshot {
            cols: self.state.cols,
            rows: self.state.rows,
            first_row: start,
            lines: self.state.active_screen().rows[start as usize..end as usize].to_vec(),
            cursor: self.cursor(),
            alternate: self.state.using_alternate,
            title: self.state.title.clone(),
        }
    }

    /// Copy of the last `scrollback_lines` history rows followed by the visible rows.
    pub fn recent_rows(&self, scrollback_lines: usize) -> Vec<Row> {
        let screen = self.state.active_screen();
        let skip = screen.scrollback.len().saturating_sub(scrollback_lines);
        screen
            .scrollback
            .iter()
            .skip(skip)
            .chain(screen.rows.iter())
            .cloned()
            .collect()
    }

    /// Visible text without attributes.
    pub fn plain_text(&self) -> String {
        rows_to_text(&self.state.active_screen().rows)
    }

    /// Primary-screen scrollback followed by the visible text.
    pub fn transcript(&self) -> String {
        let history = &self.state.primary_screen.scrollback;
        rows_to_text(history.iter().chain(self.state.active_screen().rows.iter()))
    }

    pub fn scrollback_len(&self) -> usize {
        self.state.primary_screen.scrollback.len()
    }
}
