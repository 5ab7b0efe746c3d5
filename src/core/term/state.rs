//! Terminal state management
//!
//! This module defines the terminal's grid, scrollback, cursor state, and attributes.

use bitflags::bitflags;
use std::collections::VecDeque;
use unicode_width::UnicodeWidthChar;

/// Default number of lines kept in the primary screen's scrollback.
pub const DEFAULT_SCROLLBACK_LIMIT: usize = 10_000;

/// Terminal state holding all screen data
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub primary_screen: Grid,
    pub alternate_screen: Grid,
    pub using_alternate: bool,
    pub primary_cursor: CursorState,
    pub alternate_cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub charsets: CharsetState,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    pub scroll_region: (u16, u16),
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            primary_screen: Grid::new(cols, rows, scrollback_limit),
            alternate_screen: Grid::new(cols, rows, 0),
            using_alternate: false,
            primary_cursor: CursorState::default(),
            alternate_cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            charsets: CharsetState::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
        }
    }

    pub fn active_screen(&self) -> &Grid {
        if self.using_alternate {
            &self.alternate_screen
        } else {
            &self.primary_screen
        }
    }

    pub fn active_screen_mut(&mut self) -> &mut Grid {
        if self.using_alternate {
            &mut self.alternate_screen
        } else {
            &mut self.primary_screen
        }
    }

    pub fn active_cursor(&self) -> &CursorState {
        if self.using_alternate {
            &self.alternate_cursor
        } else {
            &self.primary_cursor
        }
    }

    pub fn active_cursor_mut(&mut self) -> &mut CursorState {
        if self.using_alternate {
            &mut self.alternate_cursor
        } else {
            &mut self.primary_cursor
        }
    }

    /// Resize the terminal
    ///
    /// When the grid loses rows, blank rows under the cursor go first and
    /// the remaining excess leaves from the top, into scrollback on the
    /// primary screen.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols == self.cols && rows == self.rows {
            return;
        }

        let shifted = self
            .primary_screen
            .resize(cols, rows, self.primary_cursor.row, true);
        self.primary_cursor.shift_up(shifted);
        let shifted = self
            .alternate_screen
            .resize(cols, rows, self.alternate_cursor.row, false);
        self.alternate_cursor.shift_up(shifted);

        self.cols = cols;
        self.rows = rows;
        self.scroll_region = (0, rows - 1);

        self.primary_cursor.clamp(cols, rows);
        self.alternate_cursor.clamp(cols, rows);
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let ch = self.charsets.translate(ch);
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining character - append to previous cell
            self.append_to_previous_cell(ch);
            return;
        }
        if width > self.cols {
            return;
        }

        let cols = self.cols;
        let cursor_col = self.active_cursor().col;

        // Deferred wrap: the cursor may sit one past the last column until
        // the next printable character arrives.
        if cursor_col + width > cols {
            if self.modes.auto_wrap {
                let row = self.active_cursor().row as usize;
                self.active_screen_mut().rows[row].wrapped = true;
                self.active_cursor_mut().col = 0;
                self.linefeed();
            } else {
                self.active_cursor_mut().col = cols - width;
            }
        }

        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let insert = self.modes.insert_mode;
        let attrs = self.current_attrs.clone();

        let line = &mut self.active_screen_mut().rows[row];
        if insert {
            line.insert_blanks(col, width as usize);
        }
        line.cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs: attrs.clone(),
        };
        if width == 2 {
            line.cells[col + 1] = Cell::continuation(&attrs);
        }
        line.repair_wide(col, col + width as usize);

        self.active_cursor_mut().col += width;
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col.min(self.cols) as usize)
        };
        if col == 0 {
            return;
        }

        let line = &mut self.active_screen_mut().rows[row];
        let mut target = col - 1;
        if line.cells[target].is_continuation() && target > 0 {
            target -= 1;
        }
        if !line.cells[target].grapheme.is_empty() {
            line.cells[target].grapheme.push(ch);
        }
    }

    /// Pull a cursor sitting in the pending-wrap position back onto the grid.
    fn settle_cursor(&mut self) {
        let max_col = self.cols - 1;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.min(max_col);
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.active_cursor_mut().col = 0;
    }

    /// Line feed - move cursor down, scroll if at the bottom of the scroll region
    pub fn linefeed(&mut self) {
        let cursor_row = self.active_cursor().row;
        let scroll_bottom = self.scroll_region.1;
        let rows = self.rows;

        if cursor_row == scroll_bottom {
            self.scroll_up(1);
        } else if cursor_row + 1 < rows {
            self.active_cursor_mut().row += 1;
        }
    }

    /// Backspace - move cursor left
    pub fn backspace(&mut self) {
        self.settle_cursor();
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_sub(1);
    }

    /// Horizontal tab (stops every 8 columns)
    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = (((cursor.col / 8) + 1) * 8).min(cols - 1);
    }

    /// Scroll the scroll region up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let keep_history = !self.using_alternate && top == 0;
        let n = n.min(bottom - top + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            let removed = screen.rows.remove(top as usize);
            if keep_history {
                screen.push_to_scrollback(removed);
            }
            screen.rows.insert(bottom as usize, Row::new(cols));
        }
    }

    /// Scroll the scroll region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let n = n.min(bottom - top + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(bottom as usize);
            screen.rows.insert(top as usize, Row::new(cols));
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.settle_cursor();
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.settle_cursor();
        let max_row = self.rows - 1;
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_add(n).min(max_row);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        let max_col = self.cols - 1;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_add(n).min(max_col);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        self.settle_cursor();
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let max_row = self.rows - 1;
        let max_col = self.cols - 1;
        let cursor = self.active_cursor_mut();
        cursor.row = row.saturating_sub(1).min(max_row);
        cursor.col = col.saturating_sub(1).min(max_col);
    }

    /// Set cursor column (1-indexed)
    pub fn set_column(&mut self, col: u16) {
        let max_col = self.cols - 1;
        self.active_cursor_mut().col = col.saturating_sub(1).min(max_col);
    }

    /// Set cursor row (1-indexed)
    pub fn set_row(&mut self, row: u16) {
        self.settle_cursor();
        let max_row = self.rows - 1;
        self.active_cursor_mut().row = row.saturating_sub(1).min(max_row);
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: u16) {
        self.settle_cursor();
        let cursor_row = self.active_cursor().row as usize;
        match mode {
            0 => {
                self.erase_in_line(0);
                let screen = self.active_screen_mut();
                for row in screen.rows.iter_mut().skip(cursor_row + 1) {
                    row.clear();
                }
            }
            1 => {
                {
                    let screen = self.active_screen_mut();
                    for row in screen.rows.iter_mut().take(cursor_row) {
                        row.clear();
                    }
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                let screen = self.active_screen_mut();
                for row in &mut screen.rows {
                    row.clear();
                }
                if mode == 3 {
                    screen.scrollback.clear();
                }
            }
            _ => {}
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: u16) {
        self.settle_cursor();
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let cols = self.cols as usize;

        let line = &mut self.active_screen_mut().rows[row];
        match mode {
            0 => {
                for cell in line.cells.iter_mut().skip(col) {
                    cell.reset();
                }
                line.wrapped = false;
                line.repair_wide(col, col);
            }
            1 => {
                let end = col.min(cols - 1);
                for cell in line.cells.iter_mut().take(end + 1) {
                    cell.reset();
                }
                line.repair_wide(end, end + 1);
            }
            2 => line.clear(),
            _ => {}
        }
    }

    /// Insert lines at the cursor row, inside the scroll region
    pub fn insert_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let row = self.active_cursor().row;
        if row < top || row > bottom {
            return;
        }
        let cols = self.cols;
        let n = n.min(bottom - row + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(bottom as usize);
            screen.rows.insert(row as usize, Row::new(cols));
        }
        self.carriage_return();
    }

    /// Delete lines at the cursor row, inside the scroll region
    pub fn delete_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let row = self.active_cursor().row;
        if row < top || row > bottom {
            return;
        }
        let cols = self.cols;
        let n = n.min(bottom - row + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(row as usize);
            screen.rows.insert(bottom as usize, Row::new(cols));
        }
        self.carriage_return();
    }

    /// Insert blank characters at the cursor, shifting the rest of the line right
    pub fn insert_chars(&mut self, n: u16) {
        self.settle_cursor();
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let n = (n as usize).min(self.cols as usize - col);
        self.active_screen_mut().rows[row].insert_blanks(col, n);
    }

    /// Delete characters at the cursor, shifting the rest of the line left
    pub fn delete_chars(&mut self, n: u16) {
        self.settle_cursor();
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let n = (n as usize).min(self.cols as usize - col);

        let line = &mut self.active_screen_mut().rows[row];
        line.cells.drain(col..col + n);
        line.cells
            .extend(std::iter::repeat_with(Cell::default).take(n));
        let len = line.cells.len();
        line.repair_wide(col, len);
    }

    /// Erase characters from the cursor without moving anything
    pub fn erase_chars(&mut self, n: u16) {
        self.settle_cursor();
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let end = (col + n as usize).min(self.cols as usize);

        let line = &mut self.active_screen_mut().rows[row];
        for cell in &mut line.cells[col..end] {
            cell.reset();
        }
        line.repair_wide(col, end);
    }

    /// Set scroll region (1-indexed, inclusive); a valid region homes the cursor
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let max_row = self.rows - 1;
        let top = top.saturating_sub(1).min(max_row);
        let bottom = bottom.saturating_sub(1).min(max_row);
        if top < bottom {
            self.scroll_region = (top, bottom);
            self.cursor_position(1, 1);
        }
    }

    /// Save cursor position
    pub fn save_cursor(&mut self) {
        let (col, row) = {
            let cursor = self.active_cursor();
            (cursor.col, cursor.row)
        };
        let saved = SavedCursor {
            col,
            row,
            attrs: self.current_attrs.clone(),
            charsets: self.charsets,
        };
        self.active_cursor_mut().saved = Some(saved);
    }

    /// Restore cursor position
    pub fn restore_cursor(&mut self) {
        let (cols, rows) = (self.cols, self.rows);
        let saved = self.active_cursor().saved.clone();
        match saved {
            Some(saved) => {
                let cursor = self.active_cursor_mut();
                cursor.col = saved.col.min(cols);
                cursor.row = saved.row.min(rows - 1);
                self.current_attrs = saved.attrs;
                self.charsets = saved.charsets;
            }
            None => {
                self.cursor_position(1, 1);
                self.current_attrs.reset();
            }
        }
    }

    /// Set ANSI mode (SM / RM)
    pub fn set_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            4 => self.modes.insert_mode = enable,
            20 => self.modes.linefeed_newline = enable,
            _ => {}
        }
    }

    /// Set private mode
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            25 => self.active_cursor_mut().visible = enable,
            47 | 1047 => {
                if enable && !self.using_alternate {
                    self.enter_alternate();
                } else if !enable {
                    self.using_alternate = false;
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    if !self.using_alternate {
                        self.save_cursor();
                        self.enter_alternate();
                        self.alternate_cursor = CursorState::default();
                    }
                } else if self.using_alternate {
                    self.using_alternate = false;
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {} // Ignore unknown modes
        }
    }

    fn enter_alternate(&mut self) {
        self.alternate_screen = Grid::new(self.cols, self.rows, 0);
        self.using_alternate = true;
    }

    /// Reverse index - cursor up, scroll if at top
    pub fn reverse_index(&mut self) {
        let cursor_row = self.active_cursor().row;
        let scroll_top = self.scroll_region.0;

        if cursor_row == scroll_top {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// Index - cursor down, scroll if at bottom
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// Next line - carriage return plus index
    pub fn next_line(&mut self) {
        self.carriage_return();
        self.linefeed();
    }

    /// Full reset (RIS). Size, title and scrollback survive.
    pub fn reset(&mut self) {
        let scrollback = std::mem::take(&mut self.primary_screen.scrollback);
        let title = std::mem::take(&mut self.title);
        *self = Self::new(self.cols, self.rows, self.primary_screen.scrollback_limit);
        self.primary_screen.scrollback = scrollback;
        self.title = title;
    }

    /// Soft reset (DECSTR)
    pub fn soft_reset(&mut self) {
        self.modes = TerminalModes::default();
        self.current_attrs.reset();
        self.charsets = CharsetState::default();
        self.scroll_region = (0, self.rows - 1);
        let cursor = self.active_cursor_mut();
        cursor.visible = true;
        cursor.saved = None;
    }
}

/// Rows plus bounded scrollback for one screen
pub struct Grid {
    /// Visible rows
    pub rows: Vec<Row>,
    /// Lines scrolled off the top, oldest first
    pub scrollback: VecDeque<Row>,
    pub scrollback_limit: usize,
}

impl Grid {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self {
            rows: (0..rows).map(|_| Row::new(cols)).collect(),
            scrollback: VecDeque::new(),
            scrollback_limit,
        }
    }

    /// Resize the grid, returning how many rows left from the top.
    pub fn resize(&mut self, new_cols: u16, new_rows: u16, cursor_row: u16, keep_history: bool) -> u16 {
        let new_rows = new_rows as usize;
        let mut removed_top = 0;

        if self.rows.len() > new_rows {
            let mut excess = self.rows.len() - new_rows;
            while excess > 0
                && self.rows.len() - 1 > cursor_row as usize
                && self.rows.last().map_or(false, Row::is_blank)
            {
                self.rows.pop();
                excess -= 1;
            }
            let evicted: Vec<Row> = self.rows.drain(..excess).collect();
            if keep_history {
                for row in evicted {
                    self.push_to_scrollback(row);
                }
            }
            removed_top = excess as u16;
        }
        while self.rows.len() < new_rows {
            self.rows.push(Row::new(new_cols));
        }

        for row in &mut self.rows {
            row.resize(new_cols);
        }

        removed_top
    }

    /// Add a row to scrollback, evicting the oldest past the limit
    pub fn push_to_scrollback(&mut self, row: Row) {
        if self.scrollback_limit == 0 {
            return;
        }
        self.scrollback.push_back(row);
        while self.scrollback.len() > self.scrollback_limit {
            self.scrollback.pop_front();
        }
    }
}

/// A single row
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// The line continues on the next row (soft wrap)
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, new_cols: u16) {
        self.cells.resize(new_cols as usize, Cell::default());
        let len = self.cells.len();
        if len > 0 {
            self.repair_wide(len - 1, len - 1);
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.reset();
        }
        self.wrapped = false;
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_blank)
    }

    fn insert_blanks(&mut self, col: usize, n: usize) {
        let len = self.cells.len();
        let n = n.min(len - col);
        self.cells.truncate(len - n);
        self.cells
            .splice(col..col, std::iter::repeat_with(Cell::default).take(n));
        self.repair_wide(col, len);
    }

    /// Blank halves of wide characters that lost their partner in `from..=to`.
    fn repair_wide(&mut self, from: usize, to: usize) {
        let len = self.cells.len();
        if len == 0 {
            return;
        }
        for i in from.saturating_sub(1)..=to.min(len - 1) {
            let orphan = match self.cells[i].width {
                2 => i + 1 >= len || self.cells[i + 1].width != 0,
                0 => i == 0 || self.cells[i - 1].width != 2,
                _ => false,
            };
            if orphan {
                let cell = &mut self.cells[i];
                cell.grapheme.clear();
                cell.width = 1;
            }
        }
    }

    /// Text of the row with continuation cells skipped and blanks as spaces
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .filter(|cell| !cell.is_continuation())
            .map(Cell::display_char)
            .collect()
    }
}

/// Join rows into plain text.
///
/// Trailing spaces are trimmed from each line, soft-wrapped rows are joined
/// to the next row without a newline, and trailing blank lines are dropped.
pub fn rows_to_text<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut out = String::new();
    for row in rows {
        let line = row.text();
        if row.wrapped {
            out.push_str(&line);
        } else {
            out.push_str(line.trim_end_matches(' '));
            out.push('\n');
        }
    }
    let end = out.trim_end_matches(&['\n', ' '][..]).len();
    out.truncate(end);
    out
}

/// A single cell
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub grapheme: String,
    /// Display width: 1, 2 for a wide head, 0 for a wide continuation
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    /// Back to an empty cell with default attributes
    pub fn reset(&mut self) {
        self.grapheme.clear();
        self.width = 1;
        self.attrs = CellAttrs::default();
    }

    pub fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: attrs.clone(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    pub fn is_blank(&self) -> bool {
        self.width == 1 && self.grapheme.is_empty() && self.attrs == CellAttrs::default()
    }

    /// Get the display character (space if empty)
    pub fn display_char(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// Cell attributes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Color definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Character set designated into G0 or G1
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Ascii,
    DecSpecialGraphics,
}

/// G0/G1 designations and which one is shifted in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CharsetState {
    pub slots: [Charset; 2],
    pub active: usize,
}

impl CharsetState {
    pub fn translate(&self, ch: char) -> char {
        match self.slots[self.active & 1] {
            Charset::Ascii => ch,
            Charset::DecSpecialGraphics => dec_special_graphics(ch),
        }
    }
}

fn dec_special_graphics(ch: char) -> char {
    match ch {
        '`' => '◆',
        'a' => '▒',
        'b' => '␉',
        'c' => '␌',
        'd' => '␍',
        'e' => '␊',
        'f' => '°',
        'g' => '±',
        'h' => '␤',
        'i' => '␋',
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺',
        'p' => '⎻',
        'q' => '─',
        'r' => '⎼',
        's' => '⎽',
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        _ => ch,
    }
}

/// Cursor shape
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorShape {
    /// Default (terminal dependent)
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    /// Blinking bar (|)
    BlinkingBar,
    /// Steady bar (|)
    SteadyBar,
}

impl CursorShape {
    /// Create from DECSCUSR parameter
    pub fn from_decscusr(n: u16) -> Self {
        match n {
            1 => CursorShape::BlinkingBlock,
            2 => CursorShape::SteadyBlock,
            3 => CursorShape::BlinkingUnderline,
            4 => CursorShape::SteadyUnderline,
            5 => CursorShape::BlinkingBar,
            6 => CursorShape::SteadyBar,
            _ => CursorShape::Default,
        }
    }
}

/// Cursor state
#[derive(Clone, Debug)]
pub struct CursorState {
    /// Column; equals the column count while a wrap is pending
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub shape: CursorShape,
    pub saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            shape: CursorShape::Default,
            saved: None,
        }
    }
}

impl CursorState {
    fn shift_up(&mut self, rows: u16) {
        self.row = self.row.saturating_sub(rows);
        if let Some(saved) = &mut self.saved {
            saved.row = saved.row.saturating_sub(rows);
        }
    }

    fn clamp(&mut self, cols: u16, rows: u16) {
        self.col = self.col.min(cols - 1);
        self.row = self.row.min(rows - 1);
        if let Some(saved) = &mut self.saved {
            saved.col = saved.col.min(cols - 1);
            saved.row = saved.row.min(rows - 1);
        }
    }
}

/// Saved cursor state
#[derive(Clone, Debug)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
    pub charsets: CharsetState,
}

/// Terminal modes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub application_keypad: bool,
    pub auto_wrap: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
    pub bracketed_paste: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            application_keypad: false,
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
            bracketed_paste: false,
        }
    }
}
