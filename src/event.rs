/// Unsolicited notification parser.
///
/// Every byte read from the module passes through `EventParser::feed`,
/// whether a command is in flight or the host is polling. The parser pulls
/// `+IPD` data frames out of the stream and watches the remaining text for
/// link state lines. Everything that is not part of a frame is handed back
/// as response text for the `ResponseScanner`.
///
/// Frame layout: `+IPD,<id>,<len>[,<ip>,<port>]:<payload>` in multiplexed
/// mode, `+IPD,<len>:<payload>` in single connection mode. State persists
/// across calls, so a frame may arrive one byte per poll.
use heapless::Vec;

use crate::protocol::{MAX_CHANNELS, MAX_PAYLOAD};

const IPD_HEADER: &[u8] = b"+IPD,";

/// Longest `<id>,<len>,<ip>,<port>` field list before the `:`
const MAX_LENGTH_FIELD: usize = 32;

/// Longest text line inspected for link notifications
const MAX_LINK_LINE: usize = 24;

/// A complete notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Data frame complete; read it with `EventParser::payload`.
    /// `channel` is `None` in single connection mode.
    Data { channel: Option<u8> },
    /// `<id>,CONNECT` or legacy `Link`
    Connect { channel: Option<u8> },
    /// `<id>,CLOSED`, `<id>,CONNECT FAIL` or legacy `Unlink`
    Closed { channel: Option<u8> },
    /// Malformed or oversized frame discarded
    Dropped,
}

/// Result of feeding one byte
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Fed {
    /// Response text released by this byte. Holds more than one byte when
    /// a partial `+IPD,` match turns out to be ordinary text.
    pub text: Vec<u8, 5>,
    pub event: Option<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Matching `+IPD,`; `matched` bytes are held back
    Header { matched: usize },
    /// Collecting the field list up to `:`
    Length,
    Payload { channel: Option<u8>, len: usize },
    /// Skipping an oversized payload
    Discard { remaining: usize },
}

pub struct EventParser {
    phase: Phase,
    fields: Vec<u8, MAX_LENGTH_FIELD>,
    payload: Vec<u8, MAX_PAYLOAD>,
    line: Vec<u8, MAX_LINK_LINE>,
    line_overflow: bool,
}

impl EventParser {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Header { matched: 0 },
            fields: Vec::new(),
            payload: Vec::new(),
            line: Vec::new(),
            line_overflow: false,
        }
    }

    /// Whether a frame is partially assembled
    pub(crate) fn in_frame(&self) -> bool {
        self.phase != Phase::Header { matched: 0 }
    }

    /// Payload of the last `Event::Data`. Valid until the next frame starts.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn feed(&mut self, byte: u8) -> Fed {
        let mut fed = Fed::default();
        match self.phase {
            Phase::Header { matched } => {
                if byte == IPD_HEADER[matched] {
                    if matched + 1 == IPD_HEADER.len() {
                        self.fields.clear();
                        self.line.clear();
                        self.line_overflow = false;
                        self.phase = Phase::Length;
                    } else {
                        self.phase = Phase::Header {
                            matched: matched + 1,
                        };
                    }
                    return fed;
                }

                // Partial header was ordinary text after all
                for &held in &IPD_HEADER[..matched] {
                    self.release(held, &mut fed);
                }
                if byte == IPD_HEADER[0] {
                    self.phase = Phase::Header { matched: 1 };
                } else {
                    self.phase = Phase::Header { matched: 0 };
                    self.release(byte, &mut fed);
                }
            }
            Phase::Length => {
                if byte == b':' {
                    fed.event = self.begin_payload();
                } else if (byte.is_ascii_digit() || byte == b',' || byte == b'.')
                    && self.fields.push(byte).is_ok()
                {
                    // still collecting
                } else {
                    // The offending byte may open the next frame
                    self.phase = Phase::Header { matched: 0 };
                    let mut again = self.feed(byte);
                    again.event = Some(Event::Dropped);
                    return again;
                }
            }
            Phase::Payload { channel, len } => {
                // Capacity is checked in begin_payload
                let _ = self.payload.push(byte);
                if self.payload.len() == len {
                    self.phase = Phase::Header { matched: 0 };
                    fed.event = Some(Event::Data { channel });
                }
            }
            Phase::Discard { remaining } => {
                if remaining <= 1 {
                    self.phase = Phase::Header { matched: 0 };
                    fed.event = Some(Event::Dropped);
                } else {
                    self.phase = Phase::Discard {
                        remaining: remaining - 1,
                    };
                }
            }
        }
        fed
    }

    /// Give up on a frame that stopped arriving.
    ///
    /// A held partial header goes back out as text in the returned `Fed`.
    /// Any other frame is reported as `Dropped`, and the payload bytes it
    /// swallowed are returned so the caller can feed them through again.
    pub(crate) fn abandon(&mut self) -> (Fed, Vec<u8, MAX_PAYLOAD>) {
        let mut fed = Fed::default();
        let mut stale = Vec::new();
        match self.phase {
            Phase::Header { matched: 0 } => {}
            Phase::Header { matched } => {
                for &held in &IPD_HEADER[..matched] {
                    self.release(held, &mut fed);
                }
            }
            Phase::Payload { .. } => {
                stale = core::mem::take(&mut self.payload);
                fed.event = Some(Event::Dropped);
            }
            Phase::Length | Phase::Discard { .. } => {
                fed.event = Some(Event::Dropped);
            }
        }
        self.phase = Phase::Header { matched: 0 };
        (fed, stale)
    }

    /// Parse the collected field list and enter the payload phase.
    /// Returns `Dropped` when the fields are malformed.
    fn begin_payload(&mut self) -> Option<Event> {
        match parse_fields(&self.fields) {
            Some((channel, len)) if len <= MAX_PAYLOAD => {
                self.payload.clear();
                self.phase = Phase::Payload { channel, len };
                None
            }
            Some((_, len)) => {
                self.phase = Phase::Discard { remaining: len };
                None
            }
            None => {
                self.phase = Phase::Header { matched: 0 };
                Some(Event::Dropped)
            }
        }
    }

    /// Hand a text byte back to the caller and watch it for link lines.
    fn release(&mut self, byte: u8, fed: &mut Fed) {
        let _ = fed.text.push(byte);
        match byte {
            b'\n' => {
                if !self.line_overflow {
                    fed.event = parse_link_line(&self.line);
                }
                self.line.clear();
                self.line_overflow = false;
            }
            b'\r' => {}
            _ => {
                if self.line.push(byte).is_err() {
                    self.line_overflow = true;
                }
            }
        }
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `<len>` or `<id>,<len>[,<ip>,<port>]`
fn parse_fields(fields: &[u8]) -> Option<(Option<u8>, usize)> {
    let text = core::str::from_utf8(fields).ok()?;
    let mut parts = text.split(',');
    let first = parts.next()?;
    let (channel, len) = match parts.next() {
        Some(second) => (Some(parse_channel(first)?), second.parse().ok()?),
        None => (None, first.parse().ok()?),
    };
    if len == 0 {
        return None;
    }
    Some((channel, len))
}

fn parse_channel(text: &str) -> Option<u8> {
    let id: u8 = text.parse().ok()?;
    (usize::from(id) < MAX_CHANNELS).then_some(id)
}

fn parse_link_line(line: &[u8]) -> Option<Event> {
    let line = core::str::from_utf8(line).ok()?.trim();
    match line {
        "Link" => return Some(Event::Connect { channel: None }),
        "Unlink" => return Some(Event::Closed { channel: None }),
        _ => {}
    }
    let (id, status) = line.split_once(',')?;
    let channel = Some(parse_channel(id)?);
    match status {
        "CONNECT" => Some(Event::Connect { channel }),
        "CLOSED" | "CONNECT FAIL" => Some(Event::Closed { channel }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed bytes, collecting released text and events
    fn run(
        parser: &mut EventParser,
        bytes: &[u8],
    ) -> (std::vec::Vec<u8>, std::vec::Vec<(Event, std::vec::Vec<u8>)>) {
        let mut text = std::vec::Vec::new();
        let mut events = std::vec::Vec::new();
        for &b in bytes {
            let fed = parser.feed(b);
            text.extend_from_slice(&fed.text);
            if let Some(event) = fed.event {
                let payload = match event {
                    Event::Data { .. } => parser.payload().to_vec(),
                    _ => std::vec::Vec::new(),
                };
                events.push((event, payload));
            }
        }
        (text, events)
    }

    // ── Data frames ─────────────────────────────────────────────────

    #[test]
    fn multiplexed_frame() {
        let mut p = EventParser::new();
        let (text, events) = run(&mut p, b"+IPD,2,5:hello");
        assert!(text.is_empty());
        assert_eq!(
            events,
            [(Event::Data { channel: Some(2) }, b"hello".to_vec())]
        );
        assert!(!p.in_frame());
    }

    #[test]
    fn single_connection_frame() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"\r\n+IPD,3:abc\r\nOK\r\n");
        assert_eq!(events, [(Event::Data { channel: None }, b"abc".to_vec())]);
    }

    #[test]
    fn frame_with_remote_info() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"+IPD,0,4,192.168.1.9,5000:ping");
        assert_eq!(events, [(Event::Data { channel: Some(0) }, b"ping".to_vec())]);
    }

    #[test]
    fn payload_may_contain_protocol_text() {
        let mut p = EventParser::new();
        let (text, events) = run(&mut p, b"+IPD,1,10:\r\nOK\r\n+IPD");
        assert!(text.is_empty());
        assert_eq!(
            events,
            [(Event::Data { channel: Some(1) }, b"\r\nOK\r\n+IPD".to_vec())]
        );
    }

    #[test]
    fn frame_split_byte_by_byte() {
        let mut p = EventParser::new();
        let mut events = std::vec::Vec::new();
        for &b in b"+IPD,4,3:xyz".iter() {
            let (_, mut e) = run(&mut p, &[b]);
            events.append(&mut e);
        }
        assert_eq!(events, [(Event::Data { channel: Some(4) }, b"xyz".to_vec())]);
    }

    #[test]
    fn text_around_frame_is_released_in_order() {
        let mut p = EventParser::new();
        let (text, events) = run(&mut p, b"AB+IPD,0,1:zOK+IPX");
        assert_eq!(text, b"ABOK+IPX");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn repeated_plus_restarts_header() {
        let mut p = EventParser::new();
        let (text, events) = run(&mut p, b"++IPD,0,1:q");
        assert_eq!(text, b"+");
        assert_eq!(events, [(Event::Data { channel: Some(0) }, b"q".to_vec())]);
    }

    // ── Malformed frames ────────────────────────────────────────────

    #[test]
    fn garbage_length_is_dropped_and_parser_resyncs() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"+IPD,0,zz+IPD,1,2:ok");
        assert_eq!(
            events,
            [
                (Event::Dropped, std::vec::Vec::new()),
                (Event::Data { channel: Some(1) }, b"ok".to_vec()),
            ]
        );
    }

    #[test]
    fn header_inside_length_field_starts_new_frame() {
        let mut p = EventParser::new();
        let (text, events) = run(&mut p, b"+IPD,0,5+IPD,1,2:ok");
        assert!(text.is_empty());
        assert_eq!(
            events,
            [
                (Event::Dropped, std::vec::Vec::new()),
                (Event::Data { channel: Some(1) }, b"ok".to_vec()),
            ]
        );
    }

    #[test]
    fn abandoned_payload_is_handed_back() {
        let mut p = EventParser::new();
        run(&mut p, b"+IPD,0,40:short\r\nOK\r\n");
        assert!(p.in_frame());

        let (fed, stale) = p.abandon();
        assert_eq!(fed.event, Some(Event::Dropped));
        assert!(fed.text.is_empty());
        assert_eq!(&stale[..], b"short\r\nOK\r\n");
        assert!(!p.in_frame());

        let (_, events) = run(&mut p, b"+IPD,2,1:x");
        assert_eq!(events, [(Event::Data { channel: Some(2) }, b"x".to_vec())]);
    }

    #[test]
    fn abandoned_partial_header_is_text() {
        let mut p = EventParser::new();
        run(&mut p, b"+IP");
        let (fed, stale) = p.abandon();
        assert_eq!(&fed.text[..], b"+IP");
        assert_eq!(fed.event, None);
        assert!(stale.is_empty());
    }

    #[test]
    fn abandon_while_idle_is_a_no_op() {
        let mut p = EventParser::new();
        let (fed, stale) = p.abandon();
        assert_eq!(fed, Fed::default());
        assert!(stale.is_empty());
    }

    #[test]
    fn out_of_range_channel_is_dropped() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"+IPD,9,2:ab");
        assert_eq!(events[0].0, Event::Dropped);
    }

    #[test]
    fn zero_length_is_dropped() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"+IPD,0,0:");
        assert_eq!(events, [(Event::Dropped, std::vec::Vec::new())]);
        assert!(!p.in_frame());
    }

    #[test]
    fn oversized_frame_is_skipped_whole() {
        let mut p = EventParser::new();
        let mut stream = std::format!("+IPD,0,{}:", MAX_PAYLOAD + 1).into_bytes();
        stream.extend(std::iter::repeat(b'+').take(MAX_PAYLOAD + 1));
        stream.extend_from_slice(b"+IPD,0,2:hi");
        let (text, events) = run(&mut p, &stream);
        assert!(text.is_empty());
        assert_eq!(
            events,
            [
                (Event::Dropped, std::vec::Vec::new()),
                (Event::Data { channel: Some(0) }, b"hi".to_vec()),
            ]
        );
    }

    // ── Link lines ──────────────────────────────────────────────────

    #[test]
    fn link_notifications() {
        let mut p = EventParser::new();
        let (text, events) = run(&mut p, b"0,CONNECT\r\n3,CLOSED\r\n1,CONNECT FAIL\r\n");
        assert_eq!(text, b"0,CONNECT\r\n3,CLOSED\r\n1,CONNECT FAIL\r\n");
        let kinds: std::vec::Vec<Event> = events.into_iter().map(|(e, _)| e).collect();
        assert_eq!(
            kinds,
            [
                Event::Connect { channel: Some(0) },
                Event::Closed { channel: Some(3) },
                Event::Closed { channel: Some(1) },
            ]
        );
    }

    #[test]
    fn legacy_link_lines() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"\r\nLink\r\nUnlink\r\n");
        let kinds: std::vec::Vec<Event> = events.into_iter().map(|(e, _)| e).collect();
        assert_eq!(
            kinds,
            [
                Event::Connect { channel: None },
                Event::Closed { channel: None },
            ]
        );
    }

    #[test]
    fn response_lines_are_not_link_events() {
        let mut p = EventParser::new();
        let (_, events) = run(&mut p, b"OK\r\n0,SEND OK\r\nALREADY CONNECTED\r\n");
        assert!(events.is_empty());
    }
}
