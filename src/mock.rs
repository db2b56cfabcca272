/// Test doubles: scripted transport, stepping clock, recording handler and
/// a capturing logger.
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use crate::config::Config;
use crate::driver::{Esp8266, EventHandler};
use crate::transport::{Clock, Transport};

// ── Transport ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct MockError;

/// Transport that answers each `write` with the next scripted reply.
pub(crate) struct MockTransport {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    /// Maximum bytes returned per read
    pub chunk: usize,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            writes: Vec::new(),
            replies: VecDeque::new(),
            chunk: 16,
            fail_reads: false,
            fail_writes: false,
        }
    }

    /// Queue bytes to deliver after the next unanswered write
    pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Make bytes readable right away
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Bytes not yet read
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MockError> {
        if self.fail_reads {
            return Err(MockError);
        }
        let n = self.chunk.min(buf.len()).min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), MockError> {
        if self.fail_writes {
            return Err(MockError);
        }
        self.writes.push(data.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.rx.extend(reply);
        }
        Ok(())
    }
}

// ── Clock ──────────────────────────────────────────────────────────────

/// Clock that advances by `step` ms on every reading
pub(crate) struct MockClock {
    now: Cell<u64>,
    last: Cell<u64>,
    step: u64,
}

impl MockClock {
    pub fn new(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            last: Cell::new(0),
            step,
        }
    }

    /// Value the next reading will return
    pub fn peek(&self) -> u64 {
        self.now.get()
    }

    /// Value returned by the most recent reading
    pub fn last(&self) -> u64 {
        self.last.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.last.set(now);
        self.now.set(now + self.step);
        now
    }
}

// ── Event handler ──────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct Recorded {
    data: Vec<(u8, Vec<u8>)>,
    connects: Vec<Option<u8>>,
    closes: Vec<Option<u8>>,
}

/// Handler whose clones share one record, so tests can inspect it while
/// the driver holds the borrowed handler.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Rc<RefCell<Recorded>>);

impl Recorder {
    pub fn data(&self) -> Vec<(u8, Vec<u8>)> {
        self.0.borrow().data.clone()
    }

    pub fn connects(&self) -> Vec<Option<u8>> {
        self.0.borrow().connects.clone()
    }

    pub fn closes(&self) -> Vec<Option<u8>> {
        self.0.borrow().closes.clone()
    }
}

impl EventHandler for Recorder {
    fn on_data(&mut self, channel: u8, payload: &[u8]) -> i32 {
        self.0.borrow_mut().data.push((channel, payload.to_vec()));
        0
    }

    fn on_connect(&mut self, channel: Option<u8>) {
        self.0.borrow_mut().connects.push(channel);
    }

    fn on_close(&mut self, channel: Option<u8>) {
        self.0.borrow_mut().closes.push(channel);
    }
}

/// Driver that has been through a scripted `initialize`, with the
/// bring-up writes cleared.
pub(crate) fn initialized<'a>(
    handler: &'a mut dyn EventHandler,
    mut transport: MockTransport,
) -> Esp8266<'a, MockTransport, MockClock> {
    let scripted: Vec<Vec<u8>> = transport.replies.drain(..).collect();
    transport
        .reply(b"\r\nready\r\n")
        .reply(b"\r\nOK\r\n")
        .reply(b"\r\nOK\r\n");
    transport.replies.extend(scripted);

    let mut wifi = Esp8266::new(transport, MockClock::new(1), Config::default());
    if wifi.initialize(handler).is_err() {
        panic!("scripted initialize failed");
    }
    wifi.transport_mut().clear_writes();
    wifi
}

// ── Logger ─────────────────────────────────────────────────────────────

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        if CAPTURING.with(Cell::get) {
            let line = std::format!("{}", record.args());
            CAPTURED.with(|c| c.borrow_mut().push((record.level(), line)));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

/// Run `f` and return the log records it emitted on this thread.
pub(crate) fn captured_logs(f: impl FnOnce()) -> Vec<(log::Level, String)> {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });

    CAPTURED.with(|c| c.borrow_mut().clear());
    CAPTURING.with(|c| c.set(true));
    f();
    CAPTURING.with(|c| c.set(false));
    CAPTURED.with(|c| c.borrow_mut().drain(..).collect())
}
