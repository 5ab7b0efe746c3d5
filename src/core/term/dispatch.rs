//! Applying parsed actions to the terminal state.

use tracing::debug;

use super::parser::{Action, ParamGroups, Params};
use super::state::{AttrFlags, Charset, Color, CursorShape, TerminalState};

/// Response that needs to be sent back to the PTY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Operating status report: ESC [ 0 n
    StatusOk,
    /// Device attributes response
    DeviceAttributes,
    /// Secondary device attributes response
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            // VT220 responses
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

impl TerminalState {
    /// Apply one parsed action, returning a reply for the PTY if the
    /// sequence was a query.
    pub fn perform(&mut self, action: Action<'_>) -> Option<Response> {
        match action {
            Action::Print(ch) => {
                self.put_char(ch);
                None
            }
            Action::Execute(byte) => {
                self.execute(byte);
                None
            }
            Action::Esc {
                intermediates,
                byte,
            } => {
                self.esc_dispatch(intermediates, byte);
                None
            }
            Action::Csi {
                params,
                intermediates,
                byte,
            } => self.csi_dispatch(params, intermediates, byte),
            Action::Osc(data) => {
                self.osc_dispatch(data);
                None
            }
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x08 => self.backspace(),
            0x09 => self.horizontal_tab(),
            0x0A..=0x0C => {
                if self.modes.linefeed_newline {
                    self.carriage_return();
                }
                self.linefeed();
            }
            0x0D => self.carriage_return(),
            // SO / SI
            0x0E => self.charsets.active = 1,
            0x0F => self.charsets.active = 0,
            _ => {} // BEL and the rest
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], byte: u8) {
        match (intermediates, byte) {
            ([], b'7') => self.save_cursor(),
            ([], b'8') => self.restore_cursor(),
            ([], b'D') => self.index(),
            ([], b'E') => self.next_line(),
            ([], b'M') => self.reverse_index(),
            ([], b'c') => self.reset(),
            ([], b'=') => self.modes.application_keypad = true,
            ([], b'>') => self.modes.application_keypad = false,
            ([slot @ (b'(' | b')')], designator) => {
                let charset = match designator {
                    b'0' => Charset::DecSpecialGraphics,
                    _ => Charset::Ascii,
                };
                let index = if *slot == b'(' { 0 } else { 1 };
                self.charsets.slots[index] = charset;
            }
            _ => debug!("Unhandled ESC: {:?} {}", intermediates, byte as char),
        }
    }

    fn csi_dispatch(&mut self, params: Params<'_>, intermediates: &[u8], byte: u8) -> Option<Response> {
        let is_private = intermediates.first() == Some(&b'?');
        let is_gt = intermediates.first() == Some(&b'>');
        let other = intermediates
            .iter()
            .any(|b| !matches!(b, b'?' | b'>'));
        let count = params.get_or(0, 1);

        match (is_private, is_gt, other, byte) {
            // Cursor movement
            (false, false, false, b'A') => self.cursor_up(count),
            (false, false, false, b'B') => self.cursor_down(count),
            (false, false, false, b'C') => self.cursor_forward(count),
            (false, false, false, b'D') => self.cursor_backward(count),
            (false, false, false, b'E') => {
                // CNL - Cursor Next Line
                self.cursor_down(count);
                self.carriage_return();
            }
            (false, false, false, b'F') => {
                // CPL - Cursor Previous Line
                self.cursor_up(count);
                self.carriage_return();
            }
            (false, false, false, b'G') => self.set_column(params.get_or(0, 1)),
            (false, false, false, b'H') | (false, false, false, b'f') => {
                self.cursor_position(params.get_or(0, 1), params.get_or(1, 1))
            }
            (false, false, false, b'd') => self.set_row(params.get_or(0, 1)),

            // Erase
            (false, false, false, b'J') => self.erase_in_display(params.get(0).unwrap_or(0)),
            (false, false, false, b'K') => self.erase_in_line(params.get(0).unwrap_or(0)),

            // Line and character editing
            (false, false, false, b'L') => self.insert_lines(count),
            (false, false, false, b'M') => self.delete_lines(count),
            (false, false, false, b'@') => self.insert_chars(count),
            (false, false, false, b'P') => self.delete_chars(count),
            (false, false, false, b'X') => self.erase_chars(count),

            // Scroll
            (false, false, false, b'S') => self.scroll_up(count),
            (false, false, false, b'T') => self.scroll_down(count),
            (false, false, false, b'r') => {
                let rows = self.rows;
                self.set_scroll_region(params.get_or(0, 1), params.get_or(1, rows));
            }

            (false, false, false, b'm') => self.execute_sgr(params),

            (false, false, false, b's') => self.save_cursor(),
            (false, false, false, b'u') => self.restore_cursor(),

            // Device Status Report
            (false, false, false, b'n') => {
                return match params.get(0) {
                    Some(5) => Some(Response::StatusOk),
                    Some(6) => {
                        let cursor = self.active_cursor();
                        let col = cursor.col.min(self.cols - 1);
                        Some(Response::CursorPosition(cursor.row + 1, col + 1))
                    }
                    _ => None,
                };
            }

            // Device Attributes
            (false, false, false, b'c') if params.get(0).unwrap_or(0) == 0 => {
                return Some(Response::DeviceAttributes);
            }
            (false, true, false, b'c') => return Some(Response::SecondaryDeviceAttributes),

            // Modes
            (false, false, false, b'h') | (false, false, false, b'l') => {
                for &mode in params.values() {
                    self.set_mode(mode, byte == b'h');
                }
            }
            (true, false, false, b'h') | (true, false, false, b'l') => {
                for &mode in params.values() {
                    self.set_private_mode(mode, byte == b'h');
                }
            }

            // DECSCUSR - Set Cursor Style
            (false, false, true, b'q') if intermediates == b" " => {
                let shape = CursorShape::from_decscusr(params.get(0).unwrap_or(0));
                self.active_cursor_mut().shape = shape;
            }
            // DECSTR - Soft Terminal Reset
            (false, false, true, b'p') if intermediates == b"!" => self.soft_reset(),

            _ => debug!(
                "Unhandled CSI: {:?} {:?} {}",
                intermediates,
                params.values(),
                byte as char
            ),
        }
        None
    }

    fn execute_sgr(&mut self, params: Params<'_>) {
        if params.is_empty() {
            self.current_attrs.reset();
            return;
        }

        let mut groups = params.groups();
        while let Some(group) = groups.next() {
            let attrs = &mut self.current_attrs;
            match group[0] {
                0 => attrs.reset(),
                1 => attrs.flags.insert(AttrFlags::BOLD),
                2 => attrs.flags.insert(AttrFlags::DIM),
                3 => attrs.flags.insert(AttrFlags::ITALIC),
                // 4:0 turns underline off, other styles (curly, dotted, ...) map to plain underline
                4 => attrs
                    .flags
                    .set(AttrFlags::UNDERLINE, group.get(1).map_or(true, |&style| style != 0)),
                5 | 6 => attrs.flags.insert(AttrFlags::BLINK),
                7 => attrs.flags.insert(AttrFlags::INVERSE),
                8 => attrs.flags.insert(AttrFlags::HIDDEN),
                9 => attrs.flags.insert(AttrFlags::STRIKETHROUGH),
                21 => attrs.flags.insert(AttrFlags::UNDERLINE),
                22 => attrs.flags.remove(AttrFlags::BOLD | AttrFlags::DIM),
                23 => attrs.flags.remove(AttrFlags::ITALIC),
                24 => attrs.flags.remove(AttrFlags::UNDERLINE),
                25 => attrs.flags.remove(AttrFlags::BLINK),
                27 => attrs.flags.remove(AttrFlags::INVERSE),
                28 => attrs.flags.remove(AttrFlags::HIDDEN),
                29 => attrs.flags.remove(AttrFlags::STRIKETHROUGH),
                n @ 30..=37 => attrs.fg = Color::Indexed((n - 30) as u8),
                39 => attrs.fg = Color::Default,
                n @ 40..=47 => attrs.bg = Color::Indexed((n - 40) as u8),
                49 => attrs.bg = Color::Default,
                n @ 90..=97 => attrs.fg = Color::Indexed((n - 90 + 8) as u8),
                n @ 100..=107 => attrs.bg = Color::Indexed((n - 100 + 8) as u8),
                code @ (38 | 48 | 58) => {
                    let color = if group.len() > 1 {
                        colon_color(&group[1..])
                    } else {
                        semicolon_color(&mut groups)
                    };
                    match (code, color) {
                        (38, Some(color)) => attrs.fg = color,
                        (48, Some(color)) => attrs.bg = color,
                        // Underline color is not tracked
                        _ => {}
                    }
                }
                59 => {}
                _ => {} // Ignore unknown SGR codes
            }
        }
    }

    fn osc_dispatch(&mut self, data: &[u8]) {
        let mut parts = data.splitn(2, |&b| b == b';');
        let code = parts.next().unwrap_or_default();
        let Some(payload) = parts.next() else {
            return;
        };
        match code {
            b"0" | b"1" | b"2" => {
                self.title = String::from_utf8_lossy(payload).into_owned();
            }
            _ => debug!("Ignored OSC {}", String::from_utf8_lossy(code)),
        }
    }
}

/// `38;5;n` / `38;2;r;g;b`: the arguments arrive as separate parameters.
fn semicolon_color(groups: &mut ParamGroups<'_>) -> Option<Color> {
    let mut next = || groups.next().map(|group| group[0]);
    match next()? {
        5 => indexed(next()?),
        2 => {
            let (r, g, b) = (next()?, next()?, next()?);
            rgb(r, g, b)
        }
        _ => None,
    }
}

/// `38:5:n` / `38:2::r:g:b` / `38:2:r:g:b`: the arguments are sub-parameters.
fn colon_color(args: &[u16]) -> Option<Color> {
    match args {
        [5, n, ..] => indexed(*n),
        [2, r, g, b] => rgb(*r, *g, *b),
        [2, _colorspace, r, g, b, ..] => rgb(*r, *g, *b),
        _ => None,
    }
}

fn indexed(n: u16) -> Option<Color> {
    u8::try_from(n).ok().map(Color::Indexed)
}

fn rgb(r: u16, g: u16, b: u16) -> Option<Color> {
    Some(Color::Rgb(
        u8::try_from(r).ok()?,
        u8::try_from(g).ok()?,
        u8::try_from(b).ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::parser::VtParser;
    use pretty_assertions::assert_eq;

    fn feed(state: &mut TerminalState, bytes: &[u8]) -> Vec<Response> {
        let mut parser = VtParser::new();
        let mut responses = Vec::new();
        parser.feed(bytes, &mut |action| {
            if let Some(response) = state.perform(action) {
                responses.push(response);
            }
        });
        responses
    }

    #[test]
    fn test_cursor_movement() {
        let mut state = TerminalState::new(80, 24, 0);

        feed(&mut state, b"\x1b[5;10H");
        assert_eq!(state.active_cursor().row, 4);
        assert_eq!(state.active_cursor().col, 9);

        feed(&mut state, b"\x1b[2A");
        assert_eq!(state.active_cursor().row, 2);

        feed(&mut state, b"\x1b[0C\x1b[3G\x1b[7d");
        assert_eq!(state.active_cursor().col, 2);
        assert_eq!(state.active_cursor().row, 6);
    }

    #[test]
    fn test_sgr_colors() {
        let mut state = TerminalState::new(80, 24, 0);

        feed(&mut state, b"\x1b[31m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(1));

        feed(&mut state, b"\x1b[1;44m");
        assert!(state.current_attrs.flags.contains(AttrFlags::BOLD));
        assert_eq!(state.current_attrs.bg, Color::Indexed(4));

        feed(&mut state, b"\x1b[0m");
        assert_eq!(state.current_attrs, Default::default());
    }

    #[test]
    fn test_sgr_extended_colors() {
        let mut state = TerminalState::new(80, 24, 0);

        feed(&mut state, b"\x1b[38;5;208m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(208));

        feed(&mut state, b"\x1b[48;2;10;20;30m");
        assert_eq!(state.current_attrs.bg, Color::Rgb(10, 20, 30));

        feed(&mut state, b"\x1b[38:2::1:2:3m");
        assert_eq!(state.current_attrs.fg, Color::Rgb(1, 2, 3));

        feed(&mut state, b"\x1b[48:5:9m");
        assert_eq!(state.current_attrs.bg, Color::Indexed(9));
    }

    #[test]
    fn test_sgr_out_of_range_color_is_ignored() {
        let mut state = TerminalState::new(80, 24, 0);
        feed(&mut state, b"\x1b[32m");
        feed(&mut state, b"\x1b[38;5;300m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(2));

        feed(&mut state, b"\x1b[38;2;1;999;3m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(2));
    }

    #[test]
    fn test_sgr_underline_color_args_not_misread() {
        let mut state = TerminalState::new(80, 24, 0);
        // Without consuming 58's arguments, the 5 would turn on blink
        feed(&mut state, b"\x1b[58;5;1;3m");
        assert_eq!(state.current_attrs.flags, AttrFlags::ITALIC);
    }

    #[test]
    fn test_sgr_unknown_code_does_not_stop_later_codes() {
        let mut state = TerminalState::new(80, 24, 0);
        feed(&mut state, b"\x1b[73;1m");
        assert!(state.current_attrs.flags.contains(AttrFlags::BOLD));
    }

    #[test]
    fn test_underline_subparam_off() {
        let mut state = TerminalState::new(80, 24, 0);
        feed(&mut state, b"\x1b[4m");
        assert!(state.current_attrs.flags.contains(AttrFlags::UNDERLINE));
        feed(&mut state, b"\x1b[4:0m");
        assert!(!state.current_attrs.flags.contains(AttrFlags::UNDERLINE));
    }

    #[test]
    fn test_device_queries() {
        let mut state = TerminalState::new(80, 24, 0);
        feed(&mut state, b"\x1b[3;7H");
        assert_eq!(
            feed(&mut state, b"\x1b[6n\x1b[5n\x1b[c\x1b[>c"),
            vec![
                Response::CursorPosition(3, 7),
                Response::StatusOk,
                Response::DeviceAttributes,
                Response::SecondaryDeviceAttributes,
            ]
        );
        assert_eq!(Response::CursorPosition(3, 7).to_bytes(), b"\x1b[3;7R".to_vec());
    }

    #[test]
    fn test_osc_title() {
        let mut state = TerminalState::new(80, 24, 0);
        feed(&mut state, b"\x1b]2;build logs\x07");
        assert_eq!(state.title, "build logs");
        feed(&mut state, b"\x1b]7;file:///tmp\x07");
        assert_eq!(state.title, "build logs");
    }

    #[test]
    fn test_private_modes() {
        let mut state = TerminalState::new(80, 24, 0);
        feed(&mut state, b"\x1b[?25l\x1b[?2004h\x1b[?1h");
        assert!(!state.active_cursor().visible);
        assert!(state.modes.bracketed_paste);
        assert!(state.modes.application_cursor);

        feed(&mut state, b"\x1b[?1049h");
        assert!(state.using_alternate);
        feed(&mut state, b"\x1b[?1049l");
        assert!(!state.using_alternate);
    }

    #[test]
    fn test_linefeed_newline_mode() {
        let mut state = TerminalState::new(10, 3, 0);
        feed(&mut state, b"\x1b[20hab\ncd");
        assert_eq!(state.active_cursor().row, 1);
        assert_eq!(state.active_screen().rows[1].text().trim_end(), "cd");
    }

    #[test]
    fn test_charset_designation_and_shift() {
        let mut state = TerminalState::new(10, 1, 0);
        feed(&mut state, b"\x1b)0q\x0eq\x0fq");
        assert_eq!(state.active_screen().rows[0].text().trim_end(), "q─q");
    }

    #[test]
    fn test_cursor_style() {
        let mut state = TerminalState::new(10, 1, 0);
        feed(&mut state, b"\x1b[5 q");
        assert_eq!(state.active_cursor().shape, CursorShape::BlinkingBar);
    }

    #[test]
    fn test_full_reset_keeps_scrollback() {
        let mut state = TerminalState::new(10, 1, 10);
        feed(&mut state, b"old\n\x1b[31mx\x1bc");
        assert_eq!(state.primary_screen.scrollback.len(), 1);
        assert_eq!(state.current_attrs, Default::default());
        assert!(state.active_screen().rows[0].is_blank());
    }

    #[test]
    fn test_scroll_region_homes_cursor() {
        let mut state = TerminalState::new(10, 10, 0);
        feed(&mut state, b"\x1b[5;5H\x1b[2;8r");
        assert_eq!(state.scroll_region, (1, 7));
        assert_eq!((state.active_cursor().row, state.active_cursor().col), (0, 0));
    }
}
