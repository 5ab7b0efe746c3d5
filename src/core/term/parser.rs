//! VT sequence parser
//!
//! Splits a raw PTY byte stream into printable characters, C0 controls and
//! escape sequences. The state machine is a plain value: [`transition`] maps a
//! `(state, byte)` pair to the next state plus the [`Step`] to take, and
//! [`VtParser`] applies that step to its collection buffers. Nothing in here
//! touches the screen; complete sequences are handed to a sink as
//! [`Action`]s, which keeps the parser free of I/O and easy to feed arbitrary
//! bytes.
//!
//! Partial sequences, including half-received UTF-8 characters, stay in the
//! parser between calls, so the result never depends on how the stream was
//! chunked.

/// Maximum number of CSI parameters kept; extra parameters are dropped.
pub const MAX_PARAMS: usize = 32;

/// Maximum OSC payload length in bytes; the rest of a longer payload is dropped.
pub const MAX_OSC_LEN: usize = 4096;

const MAX_INTERMEDIATES: usize = 4;

const REPLACEMENT: char = '\u{FFFD}';

/// Parser states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    /// Malformed CSI; swallow bytes until its final byte.
    CsiIgnore,
    OscString,
    /// ESC received within OSC, waiting for backslash
    OscEscape,
    /// DCS, SOS, PM and APC strings are consumed without effect.
    StringIgnore,
    StringIgnoreEscape,
}

/// What to do with the byte that caused a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Ignore,
    Print,
    Execute,
    /// Forget collected parameters and intermediates.
    Clear,
    Collect,
    Param,
    EscDispatch,
    CsiDispatch,
    OscStart,
    OscPut,
    OscEnd,
    /// Finish the OSC string, then handle the byte as the one following ESC.
    OscEndReprocess,
    /// Leave an ignored string and handle the byte as the one following ESC.
    Reprocess,
}

/// The transition table.
pub fn transition(state: ParserState, byte: u8) -> (ParserState, Step) {
    use ParserState::*;

    match state {
        OscString => match byte {
            0x07 => (Ground, Step::OscEnd),
            0x1B => (OscEscape, Step::Ignore),
            0x18 | 0x1A => (Ground, Step::Ignore),
            0x00..=0x1F => (OscString, Step::Ignore),
            _ => (OscString, Step::OscPut),
        },
        OscEscape => match byte {
            b'\\' => (Ground, Step::OscEnd),
            _ => (Escape, Step::OscEndReprocess),
        },
        StringIgnore => match byte {
            0x1B => (StringIgnoreEscape, Step::Ignore),
            0x07 | 0x18 | 0x1A => (Ground, Step::Ignore),
            _ => (StringIgnore, Step::Ignore),
        },
        StringIgnoreEscape => match byte {
            b'\\' => (Ground, Step::Ignore),
            _ => (Escape, Step::Reprocess),
        },
        _ => match byte {
            0x1B => (Escape, Step::Clear),
            // CAN and SUB abort whatever sequence is in progress
            0x18 | 0x1A => (Ground, Step::Ignore),
            0x00..=0x1F => (state, Step::Execute),
            0x7F => (state, Step::Ignore),
            _ => sequence_transition(state, byte),
        },
    }
}

fn sequence_transition(state: ParserState, byte: u8) -> (ParserState, Step) {
    use ParserState::*;

    match state {
        Ground => (Ground, Step::Print),
        Escape => match byte {
            b'[' => (CsiEntry, Step::Clear),
            b']' => (OscString, Step::OscStart),
            b'P' | b'X' | b'^' | b'_' => (StringIgnore, Step::Ignore),
            0x20..=0x2F => (EscapeIntermediate, Step::Collect),
            0x30..=0x7E => (Ground, Step::EscDispatch),
            _ => (Ground, Step::Ignore),
        },
        EscapeIntermediate => match byte {
            0x20..=0x2F => (EscapeIntermediate, Step::Collect),
            0x30..=0x7E => (Ground, Step::EscDispatch),
            _ => (Ground, Step::Ignore),
        },
        CsiEntry => match byte {
            b'0'..=b'9' | b':' | b';' => (CsiParam, Step::Param),
            // Private markers: ? > = <
            b'<'..=b'?' => (CsiParam, Step::Collect),
            0x20..=0x2F => (CsiIntermediate, Step::Collect),
            0x40..=0x7E => (Ground, Step::CsiDispatch),
            _ => (Ground, Step::Ignore),
        },
        CsiParam => match byte {
            b'0'..=b'9' | b':' | b';' => (CsiParam, Step::Param),
            b'<'..=b'?' => (CsiIgnore, Step::Ignore),
            0x20..=0x2F => (CsiIntermediate, Step::Collect),
            0x40..=0x7E => (Ground, Step::CsiDispatch),
            _ => (Ground, Step::Ignore),
        },
        CsiIntermediate => match byte {
            0x20..=0x2F => (CsiIntermediate, Step::Collect),
            0x30..=0x3F => (CsiIgnore, Step::Ignore),
            0x40..=0x7E => (Ground, Step::CsiDispatch),
            _ => (Ground, Step::Ignore),
        },
        CsiIgnore => match byte {
            0x40..=0x7E | 0x80..=0xFF => (Ground, Step::Ignore),
            _ => (CsiIgnore, Step::Ignore),
        },
        OscString | OscEscape | StringIgnore | StringIgnoreEscape => (Ground, Step::Ignore),
    }
}

/// CSI parameters, with `:` sub-parameters kept attached to their parent.
#[derive(Clone, Copy, Debug)]
pub struct Params<'a> {
    values: &'a [u16],
    subparams: &'a [bool],
}

impl<'a> Params<'a> {
    pub fn new(values: &'a [u16], subparams: &'a [bool]) -> Self {
        Self { values, subparams }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Raw parameter value; an omitted parameter reads as 0.
    pub fn get(&self, index: usize) -> Option<u16> {
        self.values.get(index).copied()
    }

    /// Parameter value with omitted and zero values replaced by `default`.
    pub fn get_or(&self, index: usize, default: u16) -> u16 {
        match self.get(index) {
            None | Some(0) => default,
            Some(value) => value,
        }
    }

    pub fn values(&self) -> &'a [u16] {
        self.values
    }

    /// Iterate parameters grouped with their `:` sub-parameters.
    ///
    /// `38:2::1:2:3;1` yields `[38, 2, 0, 1, 2, 3]` and then `[1]`.
    pub fn groups(&self) -> ParamGroups<'a> {
        ParamGroups {
            values: self.values,
            subparams: self.subparams,
            pos: 0,
        }
    }
}

/// Iterator returned by [`Params::groups`].
pub struct ParamGroups<'a> {
    values: &'a [u16],
    subparams: &'a [bool],
    pos: usize,
}

impl<'a> Iterator for ParamGroups<'a> {
    type Item = &'a [u16];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.values.len() {
            return None;
        }
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.values.len() && self.subparams.get(self.pos).copied().unwrap_or(false) {
            self.pos += 1;
        }
        Some(&self.values[start..self.pos])
    }
}

/// A complete unit of terminal input.
#[derive(Clone, Copy, Debug)]
pub enum Action<'a> {
    Print(char),
    Execute(u8),
    Esc {
        intermediates: &'a [u8],
        byte: u8,
    },
    Csi {
        params: Params<'a>,
        intermediates: &'a [u8],
        byte: u8,
    },
    Osc(&'a [u8]),
}

#[derive(Default)]
struct Utf8Decoder {
    buf: [u8; 4],
    len: usize,
    need: usize,
}

impl Utf8Decoder {
    fn is_pending(&self) -> bool {
        self.need != 0
    }

    fn reset(&mut self) {
        self.len = 0;
        self.need = 0;
    }

    fn push(&mut self, byte: u8) -> Option<char> {
        if self.need == 0 {
            self.need = match byte {
                0xC2..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF4 => 4,
                _ => return Some(REPLACEMENT),
            };
            self.buf[0] = byte;
            self.len = 1;
            return None;
        }

        self.buf[self.len] = byte;
        self.len += 1;
        if self.len < self.need {
            return None;
        }

        let ch = std::str::from_utf8(&self.buf[..self.len])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(REPLACEMENT);
        self.reset();
        Some(ch)
    }
}

/// Parser state machine
#[derive(Default)]
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    subparams: Vec<bool>,
    current_param: Option<u16>,
    next_is_subparam: bool,
    intermediates: Vec<u8>,
    osc: Vec<u8>,
    utf8: Utf8Decoder,
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            params: Vec::with_capacity(16),
            subparams: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(MAX_INTERMEDIATES),
            ..Self::default()
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed a buffer, handing every completed action to `sink`.
    pub fn feed<F>(&mut self, bytes: &[u8], sink: &mut F)
    where
        F: FnMut(Action<'_>),
    {
        for &byte in bytes {
            self.advance(byte, sink);
        }
    }

    /// Feed a single byte to the parser
    pub fn advance<F>(&mut self, byte: u8, sink: &mut F)
    where
        F: FnMut(Action<'_>),
    {
        // A truncated UTF-8 character is replaced once something else arrives
        if self.utf8.is_pending() && !(0x80..=0xBF).contains(&byte) {
            self.utf8.reset();
            sink(Action::Print(REPLACEMENT));
        }

        let (next, step) = transition(self.state, byte);
        self.state = next;

        match step {
            Step::Ignore => {}
            Step::Print => {
                if byte < 0x80 {
                    sink(Action::Print(byte as char));
                } else if let Some(ch) = self.utf8.push(byte) {
                    sink(Action::Print(ch));
                }
            }
            Step::Execute => sink(Action::Execute(byte)),
            Step::Clear => self.clear(),
            Step::Collect => {
                if self.intermediates.len() < MAX_INTERMEDIATES {
                    self.intermediates.push(byte);
                }
            }
            Step::Param => self.param(byte),
            Step::EscDispatch => sink(Action::Esc {
                intermediates: &self.intermediates,
                byte,
            }),
            Step::CsiDispatch => {
                if self.current_param.is_some() || !self.params.is_empty() {
                    self.push_param();
                }
                sink(Action::Csi {
                    params: Params::new(&self.params, &self.subparams),
                    intermediates: &self.intermediates,
                    byte,
                });
            }
            Step::OscStart => self.osc.clear(),
            Step::OscPut => {
                if self.osc.len() < MAX_OSC_LEN {
                    self.osc.push(byte);
                }
            }
            Step::OscEnd => sink(Action::Osc(&self.osc)),
            Step::OscEndReprocess => {
                sink(Action::Osc(&self.osc));
                self.clear();
                self.advance(byte, sink);
            }
            Step::Reprocess => {
                self.clear();
                self.advance(byte, sink);
            }
        }
    }

    fn clear(&mut self) {
        self.params.clear();
        self.subparams.clear();
        self.current_param = None;
        self.next_is_subparam = false;
        self.intermediates.clear();
    }

    fn param(&mut self, byte: u8) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            _ => {
                self.push_param();
                self.next_is_subparam = byte == b':';
            }
        }
    }

    fn push_param(&mut self) {
        if self.params.len() < MAX_PARAMS {
            self.params.push(self.current_param.unwrap_or(0));
            self.subparams.push(self.next_is_subparam);
        }
        self.current_param = None;
        self.next_is_subparam = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    enum Owned {
        Print(char),
        Execute(u8),
        Esc(Vec<u8>, u8),
        Csi(Vec<Vec<u16>>, Vec<u8>, u8),
        Osc(Vec<u8>),
    }

    fn collect(parser: &mut VtParser, bytes: &[u8], out: &mut Vec<Owned>) {
        parser.feed(bytes, &mut |action| {
            out.push(match action {
                Action::Print(c) => Owned::Print(c),
                Action::Execute(b) => Owned::Execute(b),
                Action::Esc { intermediates, byte } => Owned::Esc(intermediates.to_vec(), byte),
                Action::Csi {
                    params,
                    intermediates,
                    byte,
                } => Owned::Csi(
                    params.groups().map(|g| g.to_vec()).collect(),
                    intermediates.to_vec(),
                    byte,
                ),
                Action::Osc(data) => Owned::Osc(data.to_vec()),
            })
        });
    }

    fn actions(bytes: &[u8]) -> Vec<Owned> {
        let mut parser = VtParser::new();
        let mut out = Vec::new();
        collect(&mut parser, bytes, &mut out);
        out
    }

    #[test]
    fn test_transition_table() {
        use ParserState::*;
        assert_eq!(transition(Ground, 0x1B), (Escape, Step::Clear));
        assert_eq!(transition(Escape, b'['), (CsiEntry, Step::Clear));
        assert_eq!(transition(CsiEntry, b'3'), (CsiParam, Step::Param));
        assert_eq!(transition(CsiParam, b'm'), (Ground, Step::CsiDispatch));
        assert_eq!(transition(CsiParam, b'\n'), (CsiParam, Step::Execute));
        assert_eq!(transition(Escape, b']'), (OscString, Step::OscStart));
        assert_eq!(transition(OscString, 0x07), (Ground, Step::OscEnd));
        assert_eq!(transition(Escape, b'P'), (StringIgnore, Step::Ignore));
        assert_eq!(transition(CsiParam, b'?'), (CsiIgnore, Step::Ignore));
    }

    #[test]
    fn test_plain_text_and_controls() {
        assert_eq!(
            actions(b"a\r\nb"),
            vec![
                Owned::Print('a'),
                Owned::Execute(b'\r'),
                Owned::Execute(b'\n'),
                Owned::Print('b'),
            ]
        );
    }

    #[test]
    fn test_csi_params() {
        assert_eq!(
            actions(b"\x1b[5;10H"),
            vec![Owned::Csi(vec![vec![5], vec![10]], vec![], b'H')]
        );
        // Empty trailing parameter is kept as zero
        assert_eq!(
            actions(b"\x1b[1;H"),
            vec![Owned::Csi(vec![vec![1], vec![0]], vec![], b'H')]
        );
        assert_eq!(actions(b"\x1b[m"), vec![Owned::Csi(vec![], vec![], b'm')]);
    }

    #[test]
    fn test_private_marker_collected() {
        assert_eq!(
            actions(b"\x1b[?1049h"),
            vec![Owned::Csi(vec![vec![1049]], vec![b'?'], b'h')]
        );
    }

    #[test]
    fn test_colon_subparams_grouped() {
        assert_eq!(
            actions(b"\x1b[38:2::10:20:30;1m"),
            vec![Owned::Csi(vec![vec![38, 2, 0, 10, 20, 30], vec![1]], vec![], b'm')]
        );
    }

    #[test]
    fn test_truncated_csi_across_calls() {
        let mut parser = VtParser::new();
        let mut split = Vec::new();
        collect(&mut parser, b"\x1b[3", &mut split);
        assert_eq!(parser.state(), ParserState::CsiParam);
        collect(&mut parser, b"1m", &mut split);
        assert_eq!(split, actions(b"\x1b[31m"));
    }

    #[test]
    fn test_c0_inside_csi_executes() {
        assert_eq!(
            actions(b"\x1b[3\n1m"),
            vec![
                Owned::Execute(b'\n'),
                Owned::Csi(vec![vec![31]], vec![], b'm'),
            ]
        );
    }

    #[test]
    fn test_can_aborts_sequence() {
        assert_eq!(actions(b"\x1b[31\x18m"), vec![Owned::Print('m')]);
    }

    #[test]
    fn test_malformed_csi_is_discarded() {
        // A private marker after parameters makes the sequence invalid
        assert_eq!(actions(b"\x1b[1?mX"), vec![Owned::Print('X')]);
        // Non-ASCII inside CSI resynchronizes to ground
        let mut parser = VtParser::new();
        let mut out = Vec::new();
        collect(&mut parser, b"\x1b[1\xffX", &mut out);
        assert_eq!(parser.state(), ParserState::Ground);
        assert_eq!(out, vec![Owned::Print('X')]);
    }

    #[test]
    fn test_osc_terminators() {
        assert_eq!(actions(b"\x1b]0;hi\x07"), vec![Owned::Osc(b"0;hi".to_vec())]);
        assert_eq!(
            actions(b"\x1b]2;title\x1b\\x"),
            vec![Owned::Osc(b"2;title".to_vec()), Owned::Print('x')]
        );
    }

    #[test]
    fn test_osc_interrupted_by_escape_sequence() {
        assert_eq!(
            actions(b"\x1b]0;t\x1b[1m"),
            vec![
                Owned::Osc(b"0;t".to_vec()),
                Owned::Csi(vec![vec![1]], vec![], b'm'),
            ]
        );
    }

    #[test]
    fn test_osc_payload_is_bounded() {
        let mut bytes = b"\x1b]0;".to_vec();
        bytes.extend(std::iter::repeat(b'a').take(MAX_OSC_LEN * 2));
        bytes.push(0x07);
        match actions(&bytes).as_slice() {
            [Owned::Osc(data)] => assert_eq!(data.len(), MAX_OSC_LEN),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_dcs_is_ignored() {
        assert_eq!(actions(b"\x1bPq#0;2;0;0;0\x1b\\A"), vec![Owned::Print('A')]);
    }

    #[test]
    fn test_escape_intermediate() {
        assert_eq!(actions(b"\x1b(0"), vec![Owned::Esc(vec![b'('], b'0')]);
    }

    #[test]
    fn test_utf8_split_across_calls() {
        let mut parser = VtParser::new();
        let mut out = Vec::new();
        collect(&mut parser, &[0xE4], &mut out);
        assert!(out.is_empty());
        collect(&mut parser, &[0xB8, 0xAD], &mut out);
        assert_eq!(out, vec![Owned::Print('中')]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        assert_eq!(
            actions(&[0xFF, b'a']),
            vec![Owned::Print(REPLACEMENT), Owned::Print('a')]
        );
        assert_eq!(
            actions(&[0xE4, b'a']),
            vec![Owned::Print(REPLACEMENT), Owned::Print('a')]
        );
    }

    #[test]
    fn test_too_many_params_are_dropped() {
        let mut bytes = b"\x1b[".to_vec();
        for _ in 0..(MAX_PARAMS + 10) {
            bytes.extend_from_slice(b"1;");
        }
        bytes.push(b'm');
        match actions(&bytes).as_slice() {
            [Owned::Csi(groups, _, b'm')] => assert_eq!(groups.len(), MAX_PARAMS),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_arbitrary_bytes_resynchronize() {
        // Deterministic pseudo-random noise, then CAN to force ground
        let mut seed: u32 = 0x1234_5678;
        let mut noise = Vec::with_capacity(64 * 1024);
        for _ in 0..64 * 1024 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            noise.push((seed >> 24) as u8);
        }

        let mut parser = VtParser::new();
        let mut out = Vec::new();
        collect(&mut parser, &noise, &mut out);
        collect(&mut parser, b"\x18\x1b\\ok", &mut out);

        assert_eq!(parser.state(), ParserState::Ground);
        let tail: Vec<_> = out.iter().rev().take(2).cloned().collect();
        assert_eq!(tail, vec![Owned::Print('k'), Owned::Print('o')]);
    }
}
