//! [`Transport`] over a real serial port, built on the `serialport` crate.
//!
//! The port is opened 8N1 without flow control. On Unix `serialport` takes
//! the TTY in exclusive mode, so other processes cannot open it either; the
//! in-process [`PortClaim`] turns a second open from this process into
//! [`TransportError::PortBusy`] before the OS is asked.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use super::claim::PortClaim;
use super::{SerialPortSpec, Transport};
use crate::error::TransportError;

/// Read timeout configured at open time; every `read` overrides it.
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound for writing one frame. `serialport` shares one timeout
/// between reads and writes, so it is set again before every write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    claim: Option<PortClaim>,
    path: String,
}

impl SerialTransport {
    /// Opens the port described by `spec`.
    ///
    /// # Errors
    ///
    /// [`TransportError::PortBusy`] if this process already holds the port,
    /// [`TransportError::Connection`] if the OS refuses to open it.
    pub fn open(spec: &SerialPortSpec) -> Result<Self, TransportError> {
        let claim = PortClaim::acquire(&spec.path)?;

        let port = serialport::new(&spec.path, spec.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|source| TransportError::Connection {
                path: spec.path.clone(),
                source,
            })?;

        // Drop whatever the device printed while nobody was listening.
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            debug!(path = %spec.path, "could not clear input buffer: {e}");
        }

        debug!(path = %spec.path, baud = spec.baud_rate, "serial port opened");
        Ok(Self::from_port(port, claim, spec.path.clone()))
    }

    fn from_port(port: Box<dyn SerialPort>, claim: PortClaim, path: String) -> Self {
        Self {
            port: Some(port),
            claim: Some(claim),
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.set_timeout(WRITE_TIMEOUT).map_err(std::io::Error::from)?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!(len = bytes.len(), "wrote bytes");
        Ok(())
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout).map_err(std::io::Error::from)?;

        let mut buf = vec![0u8; max_bytes.max(1)];
        match port.read(&mut buf) {
            Ok(0) => Err(TransportError::Timeout(timeout)),
            Ok(n) => {
                buf.truncate(n);
                trace!(len = n, "read bytes");
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(TransportError::Timeout(timeout)),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
        self.claim = None;
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("open", &self.port.is_some())
            .finish()
    }
}
