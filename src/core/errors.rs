/*!
 * Runtime Error Types
 * Error taxonomy for the async I/O handle layer
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// I/O layer errors delivered either synchronously (setup-time failures)
/// or through a completion handler (per-operation runtime failures).
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "error_type", content = "details")]
#[non_exhaustive]
pub enum RuntimeError {
    /// Address failed to parse or resolve
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The OS refused the bind because the address is taken
    #[error("Address already in use")]
    AddressInUse,

    /// Destination vetoed by the network policy hook
    #[error("Blocked by network policy: {0}")]
    PolicyViolation(String),

    /// Underlying OS-level I/O failure
    #[error("I/O failure: {0}")]
    Io(String),

    /// The channel is closed; benign EOF-class condition, not fatal.
    /// Implies the handle will reject all subsequent operations.
    #[error("Channel is closed")]
    ClosedChannel,

    /// Feature unavailable on this platform or socket family
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Dispatch target already torn down
    #[error("Execution context torn down")]
    Dropped,
}

impl RuntimeError {
    /// Create an invalid address error
    #[inline]
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a policy violation error
    #[inline]
    pub fn policy_violation(msg: impl Into<String>) -> Self {
        Self::PolicyViolation(msg.into())
    }

    /// Create an I/O failure error
    #[inline]
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create an unsupported-feature error
    #[inline]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether this is the benign closed-channel condition
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedChannel)
    }

    /// Classify an OS error into the runtime taxonomy.
    ///
    /// Closed-channel-class conditions (reset, broken pipe, EOF) collapse
    /// into `ClosedChannel` so the selector path and the foreign-engine
    /// path share one taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::AddrInUse => Self::AddressInUse,
            ErrorKind::AddrNotAvailable | ErrorKind::InvalidInput => {
                Self::InvalidAddress(err.to_string())
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => Self::ClosedChannel,
            ErrorKind::Unsupported => Self::Unsupported(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_io_classification() {
        let err = RuntimeError::from_io(&Error::new(ErrorKind::AddrInUse, "in use"));
        assert_eq!(err, RuntimeError::AddressInUse);

        let err = RuntimeError::from_io(&Error::new(ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_closed());

        let err = RuntimeError::from_io(&Error::new(ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err, RuntimeError::ClosedChannel);

        let err = RuntimeError::from_io(&Error::new(ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(err, RuntimeError::Io(_)));
    }

    #[test]
    fn test_error_helpers() {
        let err = RuntimeError::invalid_address("bogus");
        assert!(matches!(err, RuntimeError::InvalidAddress(_)));

        let err = RuntimeError::policy_violation("10.0.0.1:53");
        assert!(matches!(err, RuntimeError::PolicyViolation(_)));
    }
}
