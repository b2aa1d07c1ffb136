//! Error taxonomy for the splitflap driver.
//!
//! [`TransportError`] is what the byte pipe can report. [`SplitflapError`]
//! is what callers of the public API see: transport failures are folded into
//! it, and retry exhaustion, caller mistakes and device refusals each get a
//! variant of their own.

use std::time::Duration;

use splitflap_core::{NackCode, ProtocolError, TextError};
use thiserror::Error;

/// Failures of the raw serial link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port exists but could not be opened.
    #[error("could not open serial port {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// Another session in this process already holds the port.
    #[error("serial port {0} is already in use")]
    PortBusy(String),

    /// No byte arrived within the read timeout.
    #[error("no data received within {0:?}")]
    Timeout(Duration),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was used after `close()`.
    #[error("transport is closed")]
    Closed,
}

/// Errors surfaced by a splitflap session.
#[derive(Debug, Error)]
pub enum SplitflapError {
    /// The port could not be opened; no session exists.
    #[error("connection failed: {0}")]
    Connection(#[source] TransportError),

    #[error("serial port {0} is already in use")]
    PortBusy(String),

    /// Every attempt timed out or produced a garbled reply.
    ///
    /// The session stays usable after this error.
    #[error("device did not answer after {attempts} attempts")]
    DeviceUnresponsive { attempts: u32 },

    /// The text was rejected before anything was sent.
    #[error("invalid text: {0}")]
    InvalidText(#[from] TextError),

    /// The device answered with a negative acknowledgement.
    #[error("device rejected the request: {0:?}")]
    DeviceRejected(NackCode),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// The device answered the handshake with values the driver cannot use.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Module count and alphabet are not cached, e.g. after a failed refresh.
    #[error("device capabilities are not known; refresh the session")]
    NotReady,
}

impl From<TransportError> for SplitflapError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection { .. } => SplitflapError::Connection(err),
            TransportError::PortBusy(path) => SplitflapError::PortBusy(path),
            other => SplitflapError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_busy_maps_to_its_own_variant() {
        let err: SplitflapError = TransportError::PortBusy("/dev/ttyUSB0".to_string()).into();
        assert!(matches!(err, SplitflapError::PortBusy(ref p) if p == "/dev/ttyUSB0"));
    }

    #[test]
    fn test_io_error_maps_to_transport_variant() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: SplitflapError = TransportError::Io(io).into();
        assert!(matches!(err, SplitflapError::Transport(TransportError::Io(_))));
    }

    #[test]
    fn test_read_timeout_outside_an_exchange_is_a_transport_error() {
        let err: SplitflapError = TransportError::Timeout(Duration::from_millis(50)).into();
        assert!(matches!(err, SplitflapError::Transport(TransportError::Timeout(_))));
    }

    #[test]
    fn test_text_error_converts_to_invalid_text() {
        let err: SplitflapError = TextError::LengthMismatch {
            expected: 8,
            actual: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid text: text has 3 characters but the display has 8 modules"
        );
    }
}
