//! Byte transport between the host and the splitflap controller.
//!
//! The [`Transport`] trait is the seam the command engine talks through.
//! The production implementation is [`serial::SerialTransport`]; tests use
//! [`simulated::SimulatedDevice`], which answers like real firmware without
//! any hardware attached.
//!
//! # Exclusivity
//!
//! A port path can be held by one transport at a time within the process;
//! [`claim::PortClaim`] enforces that. A second `open` of the same path fails
//! with [`TransportError::PortBusy`] until the first transport is closed or
//! dropped.

use std::time::Duration;

use crate::error::TransportError;

pub mod claim;
pub mod serial;
pub mod simulated;

/// Default line speed of the controller firmware.
pub const DEFAULT_BAUD_RATE: u32 = 230_400;

/// Identifies the serial endpoint to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortSpec {
    /// OS path or name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    pub baud_rate: u32,
}

impl SerialPortSpec {
    /// Port at `path` running at [`DEFAULT_BAUD_RATE`].
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Blocking, half-duplex byte pipe to the device.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Writes the whole buffer or fails; a successful return never leaves a
    /// frame half-written.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Returns between 1 and `max_bytes` bytes, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if nothing arrived in time.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Releases the underlying handle. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}
