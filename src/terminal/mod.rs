//! Terminal Input Decoder
//!
//! Byte-at-a-time line editor for a raw-mode peer. The decoder owns the line
//! buffer and tells the session what to do for each byte; it never writes to
//! the transport itself.

/// Line buffer cap; printable bytes past this are dropped
pub const MAX_LINE: usize = 4096;

/// Bytes that visually erase one character
pub const ERASE_SEQUENCE: &[u8] = b"\x08 \x08";

/// Bytes emitted for a tab key
pub const TAB_FILL: &[u8] = b"  ";

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const TAB: u8 = 0x09;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;
const ESC: u8 = 0x1B;
const DEL: u8 = 0x7F;

/// What a fed byte asks the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Echo this printable byte back
    Echo(u8),
    /// Last character was removed; emit [`ERASE_SEQUENCE`]
    Erase,
    /// Emit [`TAB_FILL`]
    Tab,
    /// A complete, trimmed, non-empty command line
    Submit(String),
    /// Enter on an empty or whitespace-only line
    Blank,
    /// Ctrl+C: the buffer was discarded
    Interrupt,
    /// Ctrl+D: log out
    EndOfTransmission,
}

/// Escape sequence tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Normal,
    /// Saw ESC
    Escape,
    /// Inside `ESC [` ... waiting for the final byte
    Csi,
    /// Saw `ESC O`, one more byte follows
    Ss3,
}

/// Per-connection line decoder
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    escape: EscapeState,
    /// Previous byte was CR, so a following LF or NUL is part of it
    after_cr: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(128),
            escape: EscapeState::Normal,
            after_cr: false,
        }
    }

    /// Bytes typed so far on the current line
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Process one byte
    pub fn feed(&mut self, byte: u8) -> Option<Input> {
        let after_cr = std::mem::replace(&mut self.after_cr, false);

        match self.escape {
            EscapeState::Escape => {
                self.escape = match byte {
                    b'[' => EscapeState::Csi,
                    b'O' => EscapeState::Ss3,
                    _ => EscapeState::Normal,
                };
                return None;
            }
            EscapeState::Csi => {
                if (0x40..=0x7E).contains(&byte) {
                    self.escape = EscapeState::Normal;
                }
                return None;
            }
            EscapeState::Ss3 => {
                self.escape = EscapeState::Normal;
                return None;
            }
            EscapeState::Normal => {}
        }

        match byte {
            LF | 0x00 if after_cr => None,
            CR | LF => {
                self.after_cr = byte == CR;
                let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
                self.buffer.clear();
                if line.is_empty() {
                    Some(Input::Blank)
                } else {
                    Some(Input::Submit(line))
                }
            }
            BACKSPACE | DEL => self.buffer.pop().map(|_| Input::Erase),
            CTRL_C => {
                self.buffer.clear();
                Some(Input::Interrupt)
            }
            CTRL_D => Some(Input::EndOfTransmission),
            TAB => Some(Input::Tab),
            ESC => {
                self.escape = EscapeState::Escape;
                None
            }
            0x20..=0x7E => {
                if self.buffer.len() >= MAX_LINE {
                    return None;
                }
                self.buffer.push(byte);
                Some(Input::Echo(byte))
            }
            _ => None,
        }
    }

    /// Process a chunk, collecting every resulting action in order
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Input> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submits(inputs: &[Input]) -> Vec<&str> {
        inputs
            .iter()
            .filter_map(|i| match i {
                Input::Submit(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn byte_at_a_time_submits_once() {
        let mut dec = LineDecoder::new();
        let mut seen = Vec::new();
        for b in b"ls\r" {
            seen.extend(dec.feed(*b));
        }
        assert_eq!(
            seen,
            vec![Input::Echo(b'l'), Input::Echo(b's'), Input::Submit("ls".into())]
        );
    }

    #[test]
    fn backspace_on_empty_buffer_is_silent() {
        let mut dec = LineDecoder::new();
        assert_eq!(dec.feed(0x7F), None);
        assert_eq!(dec.feed(0x08), None);
    }

    #[test]
    fn backspace_edits_line() {
        let mut dec = LineDecoder::new();
        let out = dec.feed_all(b"lsx\x7f -la\r");
        assert!(out.contains(&Input::Erase));
        assert_eq!(submits(&out), vec!["ls -la"]);
    }

    #[test]
    fn crlf_is_one_terminator() {
        let mut dec = LineDecoder::new();
        let out = dec.feed_all(b"id\r\n\r\0");
        assert_eq!(out.last(), Some(&Input::Blank));
        assert_eq!(out.iter().filter(|i| **i == Input::Blank).count(), 1);
        assert_eq!(submits(&out), vec!["id"]);
    }

    #[test]
    fn bare_lf_submits() {
        let mut dec = LineDecoder::new();
        assert_eq!(submits(&dec.feed_all(b"pwd\n")), vec!["pwd"]);
    }

    #[test]
    fn whitespace_line_is_blank() {
        let mut dec = LineDecoder::new();
        assert_eq!(dec.feed_all(b"   \r").last(), Some(&Input::Blank));
    }

    #[test]
    fn interrupt_discards_buffer() {
        let mut dec = LineDecoder::new();
        let out = dec.feed_all(b"rm -rf\x03id\r");
        assert!(out.contains(&Input::Interrupt));
        assert_eq!(submits(&out), vec!["id"]);
    }

    #[test]
    fn eot_ignores_buffer_state() {
        let mut dec = LineDecoder::new();
        dec.feed_all(b"half typed");
        assert_eq!(dec.feed(CTRL_D), Some(Input::EndOfTransmission));
    }

    #[test]
    fn arrow_keys_are_swallowed() {
        let mut dec = LineDecoder::new();
        let out = dec.feed_all(b"\x1b[Aw\x1bOBho\x1b[1;5Cami\r");
        assert_eq!(submits(&out), vec!["whoami"]);
    }

    #[test]
    fn tab_is_a_stub() {
        let mut dec = LineDecoder::new();
        assert_eq!(dec.feed(TAB), Some(Input::Tab));
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn control_bytes_dropped() {
        let mut dec = LineDecoder::new();
        assert_eq!(dec.feed(0x01), None);
        assert_eq!(dec.feed(0x80), None);
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn buffer_is_capped() {
        let mut dec = LineDecoder::new();
        let long = vec![b'a'; MAX_LINE + 10];
        let echoes = dec
            .feed_all(&long)
            .into_iter()
            .filter(|i| matches!(i, Input::Echo(_)))
            .count();
        assert_eq!(echoes, MAX_LINE);
        assert_eq!(dec.pending().len(), MAX_LINE);
    }
}
