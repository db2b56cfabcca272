/// The driver object and its command/response engine.
///
/// `Esp8266` owns the transport, clock, channel table and notification
/// parser. All reads go through `pump`, which offers every byte to the
/// `EventParser` first; only response text reaches the `ResponseScanner`.
/// Notifications that arrive in the middle of a command are therefore
/// dispatched exactly like the ones seen by `poll`.
///
/// Connection and channel operations live in `connection` and `channel`.
use core::fmt;
use core::net::Ipv4Addr;

use heapless::String;

use crate::channel::{BeaconState, ChannelTable};
use crate::config::Config;
use crate::connection::WifiState;
use crate::diag::Diagnostics;
use crate::error::{CommandError, WifiError};
use crate::event::{Event, EventParser, Fed};
use crate::protocol::{self, Expect, RESPONSE_CAPACITY};
use crate::scanner::{ResponseScanner, Scan};
use crate::transport::{Clock, Transport};

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 32;

// ── Host callbacks ─────────────────────────────────────────────────────

/// Receiver for unsolicited notifications.
///
/// Called from `poll` and from inside blocking operations whenever a
/// notification completes. Handlers cannot call back into the driver.
pub trait EventHandler {
    /// Data arrived on `channel` (0 in single connection mode).
    /// The returned status code is logged at traffic level.
    fn on_data(&mut self, channel: u8, payload: &[u8]) -> i32;

    /// A link opened. `None` for the legacy `Link` notification.
    fn on_connect(&mut self, channel: Option<u8>);

    /// A link closed.
    fn on_close(&mut self, _channel: Option<u8>) {}
}

/// Adapts a data closure and a connect closure into an `EventHandler`.
pub struct Callbacks<D, C> {
    data: D,
    connect: C,
}

impl<D, C> Callbacks<D, C>
where
    D: FnMut(u8, &[u8]) -> i32,
    C: FnMut(),
{
    pub fn new(data: D, connect: C) -> Self {
        Self { data, connect }
    }
}

impl<D, C> EventHandler for Callbacks<D, C>
where
    D: FnMut(u8, &[u8]) -> i32,
    C: FnMut(),
{
    fn on_data(&mut self, channel: u8, payload: &[u8]) -> i32 {
        (self.data)(channel, payload)
    }

    fn on_connect(&mut self, _channel: Option<u8>) {
        (self.connect)()
    }
}

// ── Command results ────────────────────────────────────────────────────

/// Successful reply to `send_command`
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Success token that ended the transaction
    pub token: &'static str,
    /// Non-blank response lines before the token, joined by `\n`
    pub payload: String<RESPONSE_CAPACITY>,
    /// Set when lines were dropped because `payload` was full
    pub truncated: bool,
}

/// In-flight transaction state for one blocking call
struct Pending<'s> {
    expect: Expect,
    outcome: Scan,
    sink: Option<&'s mut dyn FnMut(&str)>,
}

// ── Driver ─────────────────────────────────────────────────────────────

pub struct Esp8266<'a, T: Transport, C: Clock> {
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) config: Config,
    pub(crate) diag: Diagnostics,
    pub(crate) state: WifiState,
    pub(crate) events: EventParser,
    pub(crate) scanner: ResponseScanner,
    pub(crate) handler: Option<&'a mut dyn EventHandler>,
    pub(crate) channels: ChannelTable,
    /// Listening port of the server, once bound
    pub(crate) server_port: Option<u16>,
    /// Whether `AT+CIPMUX=1` has been applied
    pub(crate) multiplexed: bool,
    pub(crate) last_ip: Option<Ipv4Addr>,
    /// Channel that most recently delivered data, for `reply`
    pub(crate) last_rx_channel: Option<u8>,
    pub(crate) beacon: Option<BeaconState>,
    /// When the frame being assembled last received a byte
    frame_rx_ms: u64,
}

impl<'a, T: Transport, C: Clock> Esp8266<'a, T, C> {
    pub fn new(transport: T, clock: C, config: Config) -> Self {
        Self {
            transport,
            clock,
            config,
            diag: Diagnostics::new(config.debug),
            state: WifiState::Uninitialized,
            events: EventParser::new(),
            scanner: ResponseScanner::new(),
            handler: None,
            channels: ChannelTable::new(),
            server_port: None,
            multiplexed: false,
            last_ip: None,
            last_rx_channel: None,
            beacon: None,
            frame_rx_ms: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Give back the transport and clock
    pub fn release(self) -> (T, C) {
        (self.transport, self.clock)
    }

    // ── Event loop ─────────────────────────────────────────────────

    /// Process pending notifications. Never blocks: performs a single
    /// transport read and dispatches whatever frames it completes.
    /// Must be called regularly from the host loop.
    pub fn poll(&mut self) -> Result<(), WifiError> {
        self.pump(None).map(|_| ()).map_err(|_| WifiError::Link)
    }

    // ── Command channel ────────────────────────────────────────────

    /// Send a raw AT command (without `\r\n`) and wait for `expect`.
    ///
    /// No retries; a rejected or timed out command is returned as is.
    pub fn send_command(
        &mut self,
        cmd: &str,
        expect: Expect,
        timeout_ms: u32,
    ) -> Result<Response, CommandError> {
        let mut payload = String::new();
        let mut truncated = false;
        let mut capture = |line: &str| {
            let sep = if payload.is_empty() { "" } else { "\n" };
            if payload.len() + sep.len() + line.len() > RESPONSE_CAPACITY {
                truncated = true;
                return;
            }
            let _ = payload.push_str(sep);
            let _ = payload.push_str(line);
        };
        let token = self.execute_with(format_args!("{}", cmd), expect, timeout_ms, &mut capture)?;
        Ok(Response {
            token,
            payload,
            truncated,
        })
    }

    pub(crate) fn execute(
        &mut self,
        args: fmt::Arguments<'_>,
        expect: Expect,
        timeout_ms: u32,
    ) -> Result<&'static str, CommandError> {
        let line = self.checked_command(args)?;
        self.transact(&line, expect, timeout_ms, None)
    }

    /// Like `execute`, handing each response line to `sink`
    pub(crate) fn execute_with(
        &mut self,
        args: fmt::Arguments<'_>,
        expect: Expect,
        timeout_ms: u32,
        sink: &mut dyn FnMut(&str),
    ) -> Result<&'static str, CommandError> {
        let line = self.checked_command(args)?;
        self.transact(&line, expect, timeout_ms, Some(sink))
    }

    fn checked_command(&self, args: fmt::Arguments<'_>) -> Result<protocol::CommandLine, CommandError> {
        protocol::command(args).inspect_err(|_| {
            self.diag.error(format_args!("command too long: {}", args));
        })
    }

    fn transact(
        &mut self,
        line: &str,
        expect: Expect,
        timeout_ms: u32,
        sink: Option<&mut dyn FnMut(&str)>,
    ) -> Result<&'static str, CommandError> {
        self.diag.traffic(format_args!("-> {}", line.trim_end()));
        self.scanner.reset();
        self.write_raw(line.as_bytes())?;
        self.await_response(expect, timeout_ms, sink)
    }

    pub(crate) fn write_raw(&mut self, data: &[u8]) -> Result<(), CommandError> {
        self.transport.write(data).map_err(|e| {
            self.diag.error(format_args!("transport write failed: {:?}", e));
            CommandError::Transport
        })
    }

    /// Block until a token of `expect` appears or `timeout_ms` elapses.
    pub(crate) fn await_response(
        &mut self,
        expect: Expect,
        timeout_ms: u32,
        sink: Option<&mut dyn FnMut(&str)>,
    ) -> Result<&'static str, CommandError> {
        let mut pending = Pending {
            expect,
            outcome: Scan::Pending,
            sink,
        };
        let start = self.clock.now_ms();
        loop {
            self.pump(Some(&mut pending))?;
            match pending.outcome {
                Scan::Matched(token) => return Ok(token),
                Scan::Failed(token) => {
                    self.diag.error(format_args!("command failed: {}", token));
                    return Err(CommandError::Rejected(token));
                }
                Scan::Pending => {}
            }
            if self.clock.now_ms().saturating_sub(start) >= u64::from(timeout_ms) {
                self.diag
                    .error(format_args!("no reply within {} ms", timeout_ms));
                return Err(CommandError::Timeout);
            }
        }
    }

    // ── Shared byte consumption ────────────────────────────────────

    /// One transport read. Frames go to the dispatcher, text to the scanner.
    ///
    /// A frame that stays incomplete for `FRAME_GAP_MS` without new bytes is
    /// abandoned and its swallowed payload is consumed again as ordinary
    /// traffic, so a short frame cannot eat the next command's reply.
    fn pump(&mut self, mut pending: Option<&mut Pending<'_>>) -> Result<usize, CommandError> {
        let mut buf = [0u8; READ_CHUNK];
        let n = self.transport.read(&mut buf).map_err(|e| {
            self.diag.error(format_args!("transport read failed: {:?}", e));
            CommandError::Transport
        })?;
        for &byte in &buf[..n] {
            self.consume(byte, pending.as_deref_mut());
        }

        if self.events.in_frame() {
            let now = self.clock.now_ms();
            if n > 0 {
                self.frame_rx_ms = now;
            } else if now.saturating_sub(self.frame_rx_ms) >= protocol::FRAME_GAP_MS {
                self.diag
                    .error(format_args!("incomplete frame stalled, resyncing"));
                let (fed, stale) = self.events.abandon();
                self.apply(fed, pending.as_deref_mut());
                for &byte in &stale {
                    self.consume(byte, pending.as_deref_mut());
                }
                self.frame_rx_ms = now;
            }
        }
        Ok(n)
    }

    fn consume(&mut self, byte: u8, pending: Option<&mut Pending<'_>>) {
        let fed = self.events.feed(byte);
        self.apply(fed, pending);
    }

    fn apply(&mut self, fed: Fed, mut pending: Option<&mut Pending<'_>>) {
        for &text in &fed.text {
            self.scan_text(text, pending.as_deref_mut());
        }
        if let Some(event) = fed.event {
            self.dispatch(event);
        }
    }

    fn scan_text(&mut self, byte: u8, pending: Option<&mut Pending<'_>>) {
        let line = self.scanner.push(byte);
        match pending {
            Some(p) => {
                if let Some(line) = line {
                    self.diag.traffic(format_args!("<- {}", line));
                    if p.outcome == Scan::Pending {
                        if let Some(sink) = p.sink.as_deref_mut() {
                            sink(line);
                        }
                    }
                }
                if p.outcome == Scan::Pending {
                    p.outcome = self.scanner.check(&p.expect);
                }
            }
            None => {
                if let Some(line) = line {
                    self.diag.traffic(format_args!("<- {} (unsolicited)", line));
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Data { channel } => {
                let id = channel.unwrap_or(0);
                self.last_rx_channel = Some(id);
                let payload = self.events.payload();
                self.diag
                    .traffic(format_args!("+IPD {}: {} bytes", id, payload.len()));
                if let Some(handler) = self.handler.as_deref_mut() {
                    let status = handler.on_data(id, payload);
                    self.diag
                        .traffic(format_args!("data handler returned {}", status));
                }
            }
            Event::Connect { channel } => {
                let id = channel.unwrap_or(0);
                self.diag.traffic(format_args!("link {} open", id));
                self.channels.mark_open(id, self.server_port.unwrap_or(0));
                if let Some(handler) = self.handler.as_deref_mut() {
                    handler.on_connect(channel);
                }
            }
            Event::Closed { channel } => {
                let id = channel.unwrap_or(0);
                self.diag.traffic(format_args!("link {} closed", id));
                self.channels.release(id);
                if id == protocol::BEACON_CHANNEL {
                    self.beacon = None;
                }
                if self.last_rx_channel == Some(id) {
                    self.last_rx_channel = None;
                }
                if let Some(handler) = self.handler.as_deref_mut() {
                    handler.on_close(channel);
                }
            }
            Event::Dropped => {
                self.diag.error(format_args!("dropped malformed notification"));
            }
        }
    }
}
