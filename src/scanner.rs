/// Response scanner: terminator matching over the response byte stream.
///
/// Bytes that are not part of an unsolicited frame are pushed here one at a
/// time. The scanner keeps a bounded rolling tail for token matching and the
/// current line for payload capture. A token only matches when it starts a
/// line, so payload text that merely contains `OK` (an SSID such as `BOOK`)
/// never ends a transaction.
use heapless::Vec;

use crate::protocol::{Expect, MAX_LINE_LEN, TAIL_LEN};

/// Outcome of checking the tail against an `Expect` set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Pending,
    Matched(&'static str),
    Failed(&'static str),
}

pub struct ResponseScanner {
    tail: [u8; TAIL_LEN],
    tail_len: usize,
    /// Bytes received since the last `\n`
    column: usize,
    line: Vec<u8, MAX_LINE_LEN>,
    line_done: bool,
}

impl ResponseScanner {
    pub const fn new() -> Self {
        Self {
            tail: [0; TAIL_LEN],
            tail_len: 0,
            column: 0,
            line: Vec::new(),
            line_done: false,
        }
    }

    /// Forget everything seen so far. Called at the start of each command.
    pub fn reset(&mut self) {
        self.tail_len = 0;
        self.column = 0;
        self.line.clear();
        self.line_done = false;
    }

    /// Feed one response byte. Returns the completed line, without its
    /// `\r\n`, when `byte` terminates a non-empty UTF-8 line.
    pub fn push(&mut self, byte: u8) -> Option<&str> {
        if self.line_done {
            self.line.clear();
            self.line_done = false;
        }

        if self.tail_len == TAIL_LEN {
            self.tail.copy_within(1.., 0);
            self.tail_len -= 1;
        }
        self.tail[self.tail_len] = byte;
        self.tail_len += 1;

        match byte {
            b'\n' => {
                self.column = 0;
                self.line_done = true;
                let text = core::str::from_utf8(&self.line).ok()?;
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
            b'\r' => {
                self.column += 1;
                None
            }
            _ => {
                self.column += 1;
                // Overlong lines are cut off; only their head is kept
                let _ = self.line.push(byte);
                None
            }
        }
    }

    /// Whether `token` ends the tail and starts the current line.
    pub fn ends_with(&self, token: &str) -> bool {
        let token = token.as_bytes();
        self.column == token.len() && self.tail[..self.tail_len].ends_with(token)
    }

    /// Check every failure and success token. Failure wins a tie.
    pub fn check(&self, expect: &Expect) -> Scan {
        if let Some(&token) = expect.failure.iter().find(|t| self.ends_with(t)) {
            return Scan::Failed(token);
        }
        if let Some(&token) = expect.success.iter().find(|t| self.ends_with(t)) {
            return Scan::Matched(token);
        }
        Scan::Pending
    }
}

impl Default for ResponseScanner {
    fn default() -> Self {
        Self::new()
    }
}
