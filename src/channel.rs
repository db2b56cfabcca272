/// Channel table and channel lifecycle: server, TCP client, send, close,
/// and the UDP discovery beacon.
///
/// The module multiplexes up to five links (`0..=4`). Link 4 is reserved for
/// the beacon so a client can never take it.
use core::fmt::Write;

use heapless::String;

use crate::driver::Esp8266;
use crate::error::{CommandError, WifiError};
use crate::protocol::{
    self, Beacon, BeaconBuffer, Escaped, BEACON_CHANNEL, BEACON_INTERVAL_MS, BEACON_PORT,
    COMMAND_TIMEOUT_MS, EXPECT_OK, EXPECT_OPEN, EXPECT_PROMPT, EXPECT_SENT, MAX_BEACON_LEN,
    MAX_CHANNELS, MAX_SEND_LEN, SEND_TIMEOUT_MS,
};
use crate::transport::{Clock, Transport};

/// Remote host name or address
pub type HostString = String<64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Inbound connection accepted by the server
    Server,
    TcpClient,
    UdpClient,
    Beacon,
}

/// One link slot
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: u8,
    pub state: ChannelState,
    /// `None` while idle
    pub role: Option<ChannelRole>,
    /// Empty for inbound server connections
    pub remote: HostString,
    pub port: u16,
}

impl Channel {
    const fn idle(id: u8) -> Self {
        Self {
            id,
            state: ChannelState::Idle,
            role: None,
            remote: String::new(),
            port: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn is_idle(&self) -> bool {
        self.state == ChannelState::Idle
    }
}

pub(crate) struct ChannelTable {
    slots: [Channel; MAX_CHANNELS],
}

impl ChannelTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [
                Channel::idle(0),
                Channel::idle(1),
                Channel::idle(2),
                Channel::idle(3),
                Channel::idle(4),
            ],
        }
    }

    pub(crate) fn get(&self, id: u8) -> Option<&Channel> {
        self.slots.get(usize::from(id))
    }

    fn get_mut(&mut self, id: u8) -> Option<&mut Channel> {
        self.slots.get_mut(usize::from(id))
    }

    /// Lowest idle id, never the beacon's
    pub(crate) fn allocate(&self) -> Option<u8> {
        self.slots
            .iter()
            .find(|c| c.is_idle() && c.id != BEACON_CHANNEL)
            .map(|c| c.id)
    }

    /// Claim `id` for an outgoing link. Fails if the host name does not fit.
    fn open(&mut self, id: u8, role: ChannelRole, remote: &str, port: u16) -> Result<(), WifiError> {
        let slot = self.get_mut(id).ok_or(WifiError::Link)?;
        let remote = HostString::try_from(remote).map_err(|_| WifiError::Link)?;
        *slot = Channel {
            id,
            state: ChannelState::Opening,
            role: Some(role),
            remote,
            port,
        };
        Ok(())
    }

    fn set_state(&mut self, id: u8, state: ChannelState) {
        if let Some(slot) = self.get_mut(id) {
            slot.state = state;
        }
    }

    /// Link-up notification. An idle slot becomes an inbound server link.
    pub(crate) fn mark_open(&mut self, id: u8, server_port: u16) {
        if let Some(slot) = self.get_mut(id) {
            if slot.role.is_none() {
                slot.role = Some(ChannelRole::Server);
                slot.port = server_port;
            }
            slot.state = ChannelState::Open;
        }
    }

    pub(crate) fn release(&mut self, id: u8) {
        if let Some(slot) = self.get_mut(id) {
            *slot = Channel::idle(id);
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter()
    }
}

/// Beacon datagram and its send schedule
pub(crate) struct BeaconState {
    datagram: BeaconBuffer,
    last_sent: u64,
}

impl<'a, T: Transport, C: Clock> Esp8266<'a, T, C> {
    /// Snapshot of a channel slot
    pub fn channel(&self, id: u8) -> Option<&Channel> {
        self.channels.get(id)
    }

    /// Ids of every open channel
    pub fn open_channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.channels.iter().filter(|c| c.is_open()).map(|c| c.id)
    }

    /// Listening port, once a server is bound
    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    fn ensure_multiplexed(&mut self, timeout_ms: u32) -> Result<(), WifiError> {
        if self.multiplexed {
            return Ok(());
        }
        self.execute(format_args!("AT+CIPMUX=1"), EXPECT_OK, timeout_ms)
            .map_err(|_| WifiError::Link)?;
        self.multiplexed = true;
        Ok(())
    }

    /// Listen for inbound TCP connections on `port`.
    ///
    /// Connections show up later as link notifications through `poll`.
    /// Calling again with the bound port is a no-op; a different port
    /// replaces the listener.
    pub fn start_server(&mut self, port: u16, timeout_ms: u32) -> Result<(), WifiError> {
        if self.server_port == Some(port) {
            self.diag
                .traffic(format_args!("server already listening on {}", port));
            return Ok(());
        }
        self.ensure_multiplexed(timeout_ms)?;
        if self.server_port.is_some() {
            self.execute(format_args!("AT+CIPSERVER=0"), EXPECT_OK, timeout_ms)
                .map_err(|_| WifiError::Link)?;
            self.server_port = None;
        }
        self.execute(
            format_args!("AT+CIPSERVER=1,{}", port),
            protocol::EXPECT_SETTING,
            timeout_ms,
        )
        .map_err(|_| WifiError::Link)?;
        self.server_port = Some(port);
        Ok(())
    }

    /// Open a TCP connection and return its channel id.
    pub fn start_client(&mut self, address: &str, port: u16, timeout_ms: u32) -> Result<u8, WifiError> {
        self.ensure_multiplexed(timeout_ms)?;
        let id = self.channels.allocate().ok_or(WifiError::Link)?;
        self.open_link(id, ChannelRole::TcpClient, "TCP", address, port, timeout_ms)?;
        Ok(id)
    }

    fn open_link(
        &mut self,
        id: u8,
        role: ChannelRole,
        kind: &str,
        address: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<(), WifiError> {
        self.channels.open(id, role, address, port)?;
        let result = self.execute(
            format_args!(
                "AT+CIPSTART={},\"{}\",\"{}\",{}",
                id,
                kind,
                Escaped(address),
                port
            ),
            EXPECT_OPEN,
            timeout_ms,
        );
        match result {
            Ok(_) => {
                self.channels.set_state(id, ChannelState::Open);
                Ok(())
            }
            Err(CommandError::Timeout) => {
                // The link may still come up; tear it down before the id is reused
                let _ = self.execute(
                    format_args!("AT+CIPCLOSE={}", id),
                    EXPECT_OK,
                    COMMAND_TIMEOUT_MS,
                );
                self.channels.release(id);
                Err(WifiError::Link)
            }
            Err(_) => {
                self.channels.release(id);
                Err(WifiError::Link)
            }
        }
    }

    /// Send `data` on an open channel and wait for `SEND OK`.
    pub fn send(&mut self, channel: u8, data: &[u8]) -> Result<(), WifiError> {
        if data.is_empty() || data.len() > MAX_SEND_LEN {
            self.diag
                .error(format_args!("send of {} bytes rejected", data.len()));
            return Err(WifiError::Link);
        }
        if !self.channels.get(channel).is_some_and(Channel::is_open) {
            self.diag
                .error(format_args!("send on channel {} which is not open", channel));
            return Err(WifiError::Link);
        }

        self.execute(
            format_args!("AT+CIPSEND={},{}", channel, data.len()),
            EXPECT_PROMPT,
            SEND_TIMEOUT_MS,
        )
        .map_err(|_| WifiError::Link)?;

        self.diag
            .traffic(format_args!("-> {} bytes on {}", data.len(), channel));
        self.scanner.reset();
        self.write_raw(data).map_err(|_| WifiError::Link)?;
        self.await_response(EXPECT_SENT, SEND_TIMEOUT_MS, None)
            .map(|_| ())
            .map_err(|_| WifiError::Link)
    }

    /// Send on the channel that most recently delivered data.
    pub fn reply(&mut self, data: &[u8]) -> Result<(), WifiError> {
        let channel = self.last_rx_channel.ok_or(WifiError::Link)?;
        self.send(channel, data)
    }

    /// Close a channel. The slot returns to idle on success.
    pub fn close(&mut self, channel: u8) -> Result<(), WifiError> {
        let previous = match self.channels.get(channel) {
            Some(c) if !c.is_idle() => c.state,
            _ => return Err(WifiError::Link),
        };
        self.channels.set_state(channel, ChannelState::Closing);
        match self.execute(
            format_args!("AT+CIPCLOSE={}", channel),
            EXPECT_OK,
            COMMAND_TIMEOUT_MS,
        ) {
            Ok(_) => {
                self.channels.release(channel);
                Ok(())
            }
            Err(_) => {
                // A CLOSED notification may already have freed the slot
                if !self.channels.get(channel).is_some_and(Channel::is_idle) {
                    self.channels.set_state(channel, previous);
                }
                Err(WifiError::Link)
            }
        }
    }

    // ── Discovery beacon ───────────────────────────────────────────

    /// Broadcast `{"event":"beacon","ip":..,"port":..,"device":..}` to
    /// `BEACON_PORT` on the local subnet so peers can find the server
    /// without knowing its address. Requires a bound server; the datagram
    /// advertises its port.
    ///
    /// Sends one datagram immediately; `service_beacon` repeats it.
    pub fn enable_beacon(&mut self, device: &str) -> Result<(), WifiError> {
        let port = self.server_port.ok_or(WifiError::Link)?;
        if self.beacon.is_some() {
            self.disable_beacon()?;
        }

        let ip = self.current_ip()?;
        let ip_text = protocol::format_ip(ip);
        let mut buf = [0u8; MAX_BEACON_LEN];
        let len = protocol::encode_json(&Beacon::new(&ip_text, port, device), &mut buf)
            .ok_or(WifiError::Link)?;
        let mut datagram = BeaconBuffer::new();
        datagram
            .extend_from_slice(&buf[..len])
            .map_err(|_| WifiError::Link)?;

        if !self.channels.get(BEACON_CHANNEL).is_some_and(Channel::is_idle) {
            return Err(WifiError::Link);
        }
        let mut broadcast = String::<15>::new();
        let _ = write!(broadcast, "{}", protocol::broadcast_address(ip));
        self.open_link(
            BEACON_CHANNEL,
            ChannelRole::Beacon,
            "UDP",
            &broadcast,
            BEACON_PORT,
            COMMAND_TIMEOUT_MS,
        )?;

        self.beacon = Some(BeaconState {
            datagram,
            last_sent: 0,
        });
        self.transmit_beacon()
    }

    /// Stop broadcasting and close the beacon channel.
    pub fn disable_beacon(&mut self) -> Result<(), WifiError> {
        if self.beacon.take().is_none() {
            return Ok(());
        }
        self.close(BEACON_CHANNEL)
    }

    pub fn beacon_enabled(&self) -> bool {
        self.beacon.is_some()
    }

    /// Re-send the beacon once `BEACON_INTERVAL_MS` has passed since the
    /// last datagram. Blocks for one send when due. Returns whether a
    /// datagram went out.
    pub fn service_beacon(&mut self) -> Result<bool, WifiError> {
        let Some(beacon) = &self.beacon else {
            return Ok(false);
        };
        if self.clock.now_ms().saturating_sub(beacon.last_sent) < BEACON_INTERVAL_MS {
            return Ok(false);
        }
        self.transmit_beacon().map(|_| true)
    }

    fn transmit_beacon(&mut self) -> Result<(), WifiError> {
        let datagram = match &self.beacon {
            Some(beacon) => beacon.datagram.clone(),
            None => return Ok(()),
        };
        self.send(BEACON_CHANNEL, &datagram)?;
        let now = self.clock.now_ms();
        if let Some(beacon) = self.beacon.as_mut() {
            beacon.last_sent = now;
        }
        Ok(())
    }
}
