/// Error and result-code types.
///
/// `CommandError` describes why a single AT transaction failed. Public
/// operations fold it into a `WifiError`, which maps one-to-one onto the
/// driver's numeric result codes.
use thiserror::Error;

/// Failure of one command/response transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No success or failure token appeared within the time budget
    #[error("no terminator within the timeout")]
    Timeout,
    /// The module answered with an explicit failure token
    #[error("module replied {0}")]
    Rejected(&'static str),
    /// The transport failed to read or write
    #[error("transport error")]
    Transport,
    /// The formatted command does not fit the command buffer
    #[error("command too long")]
    TooLong,
}

/// Error returned by the host-facing driver operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WifiError {
    /// An AT transaction failed or the driver is not ready for it
    #[error("AT transaction failed")]
    At,
    /// The module never announced itself after a reset
    #[error("module reset failed")]
    Reset,
    /// Association with the access point failed
    #[error("access point connection failed")]
    Connect,
    /// A channel could not be opened, used or closed
    #[error("link failure")]
    Link,
}

/// Numeric result codes reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResultCode {
    None = 0,
    At = 1,
    Reset = 2,
    Connect = 3,
    Link = 4,
}

impl WifiError {
    pub const fn code(self) -> ResultCode {
        match self {
            WifiError::At => ResultCode::At,
            WifiError::Reset => ResultCode::Reset,
            WifiError::Connect => ResultCode::Connect,
            WifiError::Link => ResultCode::Link,
        }
    }
}

impl<T> From<&Result<T, WifiError>> for ResultCode {
    fn from(result: &Result<T, WifiError>) -> Self {
        match result {
            Ok(_) => ResultCode::None,
            Err(e) => e.code(),
        }
    }
}
