/// Driver configuration, fixed at construction.

/// Operating mode of the wifi module (`AT+CWMODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    /// Station: joins an existing access point
    Station = 1,
    /// Soft access point
    AccessPoint = 2,
    /// Station and soft access point together
    Both = 3,
}

impl WifiMode {
    /// Numeric argument for `AT+CWMODE=<n>`
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// How much of the AT dialogue is written to the `log` facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    /// Silent
    None,
    /// Failed transactions and dropped frames only
    Errors,
    /// Every command, response line and notification
    AllTraffic,
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub mode: WifiMode,
    /// Serial baud rate the host configures on its UART.
    /// The driver itself never touches the transport settings.
    pub baud: u32,
    pub debug: DebugLevel,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            mode: WifiMode::Station,
            baud: 9600,
            debug: DebugLevel::None,
        }
    }

    pub const fn with_mode(mut self, mode: WifiMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub const fn with_debug(mut self, debug: DebugLevel) -> Self {
        self.debug = debug;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_module_factory_settings() {
        let config = Config::default();
        assert_eq!(config.mode, WifiMode::Station);
        assert_eq!(config.baud, 9600);
        assert_eq!(config.debug, DebugLevel::None);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = Config::new()
            .with_mode(WifiMode::Both)
            .with_baud(115_200)
            .with_debug(DebugLevel::AllTraffic);
        assert_eq!(config.mode.code(), 3);
        assert_eq!(config.baud, 115_200);
        assert!(config.debug > DebugLevel::Errors);
    }

    #[test]
    fn mode_codes() {
        assert_eq!(WifiMode::Station.code(), 1);
        assert_eq!(WifiMode::AccessPoint.code(), 2);
    }
}
