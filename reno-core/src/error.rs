//! Error type shared by the codec, the configuration layer and the drivers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenoError>;

#[derive(Error, Debug)]
pub enum RenoError {
    /// Socket errors other than the transient ones the drivers swallow
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram payload that is not a decimal sequence number
    #[error("malformed payload: {payload:?}")]
    MalformedPayload { payload: String },

    /// Rejected configuration value
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Telemetry line that does not follow the record format
    #[error("malformed telemetry record: {line:?}")]
    MalformedRecord { line: String },

    /// The flow's event channel closed before the flow finished
    #[error("event channel closed before the flow finished")]
    ChannelClosed,
}

impl RenoError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Socket errors that say nothing about the flow itself: ICMP feedback
/// from an absent peer, or a spurious wakeup.
pub(crate) fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
    )
}
