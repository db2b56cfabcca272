/// Platform seams: the serial byte stream and the monotonic clock.
///
/// The driver owns one of each. Board code implements them over its UART
/// and timer; tests use the scripted versions in `mock`.
use core::fmt;

/// Byte-stream link to the wifi module.
pub trait Transport {
    type Error: fmt::Debug;

    /// Read whatever bytes are available without blocking.
    /// Returns `Ok(0)` when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// `Clock` backed by the embassy time driver.
#[cfg(feature = "embassy")]
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

#[cfg(feature = "embassy")]
impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }
}
