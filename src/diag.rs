/// Diagnostics gate between the driver and the `log` facade.
///
/// All driver logging goes through here so the configured `DebugLevel`
/// decides what reaches the logger. With `DebugLevel::None` nothing is
/// emitted at all.
use core::fmt;

use crate::config::DebugLevel;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Diagnostics {
    level: DebugLevel,
}

impl Diagnostics {
    pub(crate) const fn new(level: DebugLevel) -> Self {
        Self { level }
    }

    /// Failed transactions, dropped frames
    pub(crate) fn error(&self, args: fmt::Arguments<'_>) {
        if self.level >= DebugLevel::Errors {
            log::warn!("{}", args);
        }
    }

    /// Raw dialogue: commands, response lines, notifications
    pub(crate) fn traffic(&self, args: fmt::Arguments<'_>) {
        if self.level >= DebugLevel::AllTraffic {
            log::debug!("{}", args);
        }
    }
}
