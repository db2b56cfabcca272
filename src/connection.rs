/// Module bring-up and access point association.
///
/// Covers reset, mode selection, joining and leaving an access point, and
/// the two informational queries (`AT+CIFSR`, `AT+CWLAP`). Query results are
/// returned as owned values; nothing hands out references into driver
/// buffers.
use core::net::Ipv4Addr;

use crate::driver::{Esp8266, EventHandler};
use crate::error::{CommandError, WifiError};
use crate::protocol::{
    parse_access_point, parse_ip_line, AccessPoint, Escaped, Interface, COMMAND_TIMEOUT_MS,
    CONNECT_TIMEOUT_MS, EXPECT_OK, EXPECT_READY, EXPECT_SETTING, RESET_TIMEOUT_MS,
    SCAN_TIMEOUT_MS,
};
use crate::transport::{Clock, Transport};

/// Lifecycle of the module connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Uninitialized,
    Initializing,
    Idle,
    Associating,
    Associated,
    /// Last reset or association attempt failed
    Failed,
}

/// Outcome of a network scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCount {
    /// Records written to the output slice
    pub written: usize,
    /// More records were reported than the limit allowed
    pub truncated: bool,
}

impl<'a, T: Transport, C: Clock> Esp8266<'a, T, C> {
    pub fn state(&self) -> WifiState {
        self.state
    }

    /// Reset the module, wait for its `ready` banner, disable echo, apply
    /// the configured mode and register the notification handler.
    ///
    /// The handler stays borrowed for the driver's lifetime.
    pub fn initialize(&mut self, handler: &'a mut dyn EventHandler) -> Result<(), WifiError> {
        self.state = WifiState::Initializing;
        self.handler = Some(handler);
        self.channels.reset();
        self.events = Default::default();
        self.server_port = None;
        self.multiplexed = false;
        self.last_ip = None;
        self.last_rx_channel = None;
        self.beacon = None;

        if self
            .execute(format_args!("AT+RST"), EXPECT_READY, RESET_TIMEOUT_MS)
            .is_err()
        {
            self.state = WifiState::Failed;
            return Err(WifiError::Reset);
        }

        let mode = self.config.mode.code();
        let setup = self
            .execute(format_args!("ATE0"), EXPECT_OK, COMMAND_TIMEOUT_MS)
            .and_then(|_| {
                self.execute(
                    format_args!("AT+CWMODE={}", mode),
                    EXPECT_SETTING,
                    COMMAND_TIMEOUT_MS,
                )
            });
        if setup.is_err() {
            self.state = WifiState::Failed;
            return Err(WifiError::At);
        }

        self.state = WifiState::Idle;
        Ok(())
    }

    /// Join an access point. No automatic retry.
    pub fn connect(&mut self, ssid: &str, password: &str) -> Result<(), WifiError> {
        if matches!(
            self.state,
            WifiState::Uninitialized | WifiState::Initializing
        ) {
            return Err(WifiError::At);
        }

        self.state = WifiState::Associating;
        let result = self.execute(
            format_args!("AT+CWJAP=\"{}\",\"{}\"", Escaped(ssid), Escaped(password)),
            EXPECT_OK,
            CONNECT_TIMEOUT_MS,
        );
        match result {
            Ok(_) => {
                self.state = WifiState::Associated;
                Ok(())
            }
            Err(CommandError::TooLong) => {
                self.state = WifiState::Idle;
                Err(WifiError::Connect)
            }
            Err(_) => {
                self.state = WifiState::Failed;
                self.last_ip = None;
                Err(WifiError::Connect)
            }
        }
    }

    /// Leave the current access point.
    pub fn disconnect(&mut self) -> Result<(), WifiError> {
        self.execute(format_args!("AT+CWQAP"), EXPECT_OK, COMMAND_TIMEOUT_MS)
            .map_err(|_| WifiError::At)?;
        self.state = WifiState::Idle;
        self.last_ip = None;
        Ok(())
    }

    /// Query the module's address.
    ///
    /// Prefers the station address, then an unlabeled address (old
    /// firmware), then the soft-AP address. An unassigned station address
    /// (`0.0.0.0`) only wins when nothing else is reported.
    pub fn current_ip(&mut self) -> Result<Ipv4Addr, WifiError> {
        let mut best: Option<(u8, Ipv4Addr)> = None;
        let mut collect = |line: &str| {
            let Some((iface, addr)) = parse_ip_line(line) else {
                return;
            };
            let rank = match iface {
                Interface::Station if !addr.is_unspecified() => 0,
                Interface::Unlabeled => 1,
                Interface::AccessPoint => 2,
                Interface::Station => 3,
            };
            if best.map_or(true, |(r, _)| rank < r) {
                best = Some((rank, addr));
            }
        };
        self.execute_with(
            format_args!("AT+CIFSR"),
            EXPECT_OK,
            COMMAND_TIMEOUT_MS,
            &mut collect,
        )
        .map_err(|_| WifiError::At)?;

        let (_, ip) = best.ok_or(WifiError::At)?;
        self.last_ip = Some(ip);
        Ok(ip)
    }

    /// Address returned by the last successful `current_ip`
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.last_ip
    }

    /// List visible networks into `out`, writing at most
    /// `min(max_entries, out.len())` records.
    ///
    /// Records past the limit are counted as truncation, never written.
    pub fn scan(&mut self, out: &mut [AccessPoint], max_entries: usize) -> Result<ScanCount, WifiError> {
        let limit = max_entries.min(out.len());
        let mut written = 0;
        let mut truncated = false;
        let mut collect = |line: &str| {
            let Some(ap) = parse_access_point(line) else {
                return;
            };
            if written < limit {
                out[written] = ap;
                written += 1;
            } else {
                truncated = true;
            }
        };
        self.execute_with(
            format_args!("AT+CWLAP"),
            EXPECT_OK,
            SCAN_TIMEOUT_MS,
            &mut collect,
        )
        .map_err(|_| WifiError::At)?;

        self.diag
            .traffic(format_args!("scan: {} networks, truncated: {}", written, truncated));
        Ok(ScanCount { written, truncated })
    }
}
