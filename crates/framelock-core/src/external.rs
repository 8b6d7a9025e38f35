//! ASCII external-control line decoding.
//!
//! A local tool (telnet, a script) sends CR-LF terminated commands. Each
//! command is answered with [`REPLY_OK`]. The session ends on CAN (24), ESC
//! (27) or one of the words `logout`, `close`, `exit`, `quit`.

use bytes::{Buf, BytesMut};

use crate::error::ControlError;

/// Sent once when a control client connects
pub const GREETING: &[u8] = b"Connected to framelock external control\r\n";

/// Sent after every command
pub const REPLY_OK: &[u8] = b"OK\r\n";

const CANCEL: u8 = 24;
const ESCAPE: u8 = 27;
const TERMINATE_WORDS: [&str; 4] = ["logout", "close", "exit", "quit"];

/// One decoded control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// Command text without the line ending
    Command(String),
    /// Client asked to end the session
    Terminate,
}

/// Accumulates bytes and splits them into control lines.
#[derive(Debug)]
pub struct LineDecoder {
    buf: BytesMut,
    max_line: usize,
}

impl LineDecoder {
    /// Decoder rejecting lines longer than `max_line` bytes.
    pub fn new(max_line: usize) -> Self {
        Self { buf: BytesMut::new(), max_line }
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line, if any.
    ///
    /// Blank lines are skipped. A lone `\n` also ends a line.
    pub fn next_line(&mut self) -> Result<Option<ControlLine>, ControlError> {
        loop {
            let Some(end) = self.buf.iter().position(|&b| matches!(b, b'\n' | CANCEL | ESCAPE))
            else {
                if self.buf.len() > self.max_line {
                    return Err(ControlError::LineTooLong { max: self.max_line });
                }
                return Ok(None);
            };

            if matches!(self.buf[end], CANCEL | ESCAPE) {
                self.buf.clear();
                return Ok(Some(ControlLine::Terminate));
            }
            if end > self.max_line {
                return Err(ControlError::LineTooLong { max: self.max_line });
            }

            let line = self.buf.split_to(end);
            self.buf.advance(1);

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches('\r').trim();
            if text.is_empty() {
                continue;
            }
            if TERMINATE_WORDS.iter().any(|word| text.eq_ignore_ascii_case(word)) {
                return Ok(Some(ControlLine::Terminate));
            }
            return Ok(Some(ControlLine::Command(text.to_owned())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str) -> Option<ControlLine> {
        Some(ControlLine::Command(text.to_owned()))
    }

    #[test]
    fn splits_crlf_lines() {
        let mut decoder = LineDecoder::new(256);
        decoder.extend(b"stats on\r\nreload\r\npar");

        assert_eq!(decoder.next_line().unwrap(), command("stats on"));
        assert_eq!(decoder.next_line().unwrap(), command("reload"));
        assert_eq!(decoder.next_line().unwrap(), None);

        decoder.extend(b"tial\n");
        assert_eq!(decoder.next_line().unwrap(), command("partial"));
    }

    #[test]
    fn skips_blank_lines() {
        let mut decoder = LineDecoder::new(256);
        decoder.extend(b"\r\n\r\n  \r\nping\r\n");
        assert_eq!(decoder.next_line().unwrap(), command("ping"));
    }

    #[test]
    fn terminate_words() {
        for word in ["logout", "close", "EXIT", "quit"] {
            let mut decoder = LineDecoder::new(256);
            decoder.extend(format!("{word}\r\n").as_bytes());
            assert_eq!(decoder.next_line().unwrap(), Some(ControlLine::Terminate), "{word}");
        }
    }

    #[test]
    fn control_characters_terminate_immediately() {
        for byte in [CANCEL, ESCAPE] {
            let mut decoder = LineDecoder::new(256);
            decoder.extend(&[b'a', b'b', byte, b'c']);
            assert_eq!(decoder.next_line().unwrap(), Some(ControlLine::Terminate));
        }
    }

    #[test]
    fn overlong_line_is_rejected() {
        let mut decoder = LineDecoder::new(8);
        decoder.extend(b"0123456789");
        assert_eq!(decoder.next_line(), Err(ControlError::LineTooLong { max: 8 }));
    }
}
