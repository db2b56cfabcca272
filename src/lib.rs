//! esplink: AT-command driver for ESP8266 wifi companion modules.
//!
//! A host microcontroller talks to the module over a serial byte stream. This
//! crate owns that dialogue: it issues AT commands, matches their replies,
//! tracks association state, multiplexes up to five TCP/UDP links, and pulls
//! unsolicited `+IPD` data frames and link notifications out of the stream no
//! matter when they arrive.
//!
//! The crate is `no_std` with no allocator. Platform binaries supply the two
//! seams in [`transport`]: a non-blocking serial [`Transport`] and a
//! millisecond [`Clock`]. Everything else is testable on any host with
//! `cargo test`.
//!
//! Layout:
//! - `driver`: the `Esp8266` object, command engine and `poll`
//! - `connection`: reset, join, leave, address query and scan
//! - `channel`: server, client links, send/close and the discovery beacon
//! - `event`, `scanner`: the byte-level notification and reply matchers
//! - `protocol`: command text, reply tokens, limits and record parsers

#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod config;
pub mod connection;
mod diag;
pub mod driver;
pub mod error;
pub mod event;
pub mod protocol;
pub mod scanner;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use channel::{Channel, ChannelRole, ChannelState};
pub use config::{Config, DebugLevel, WifiMode};
pub use connection::{ScanCount, WifiState};
pub use driver::{Callbacks, Esp8266, EventHandler, Response};
pub use error::{CommandError, ResultCode, WifiError};
pub use protocol::{AccessPoint, Encryption};
pub use transport::{Clock, Transport};

#[cfg(feature = "embassy")]
pub use transport::EmbassyClock;
