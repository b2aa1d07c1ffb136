//! Choosing which serial port the display is on.
//!
//! Enumeration and prompting are behind traits so the selection rules can
//! be tested without hardware or a terminal. With exactly one USB serial
//! device attached it is picked without asking; otherwise the user chooses
//! from the list.

use std::io::{BufRead, Write};

use thiserror::Error;
use tracing::{debug, info};

use crate::infrastructure::transport::SerialPortSpec;

#[derive(Debug, Error)]
pub enum PortSelectError {
    #[error("could not list serial ports: {0}")]
    Enumeration(#[from] serialport::Error),

    #[error("no serial ports found")]
    NoPorts,

    #[error("invalid choice {0:?}")]
    InvalidChoice(String),

    #[error("prompt I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A port as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub path: String,
    pub usb: Option<UsbDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDetails {
    pub vid: u16,
    pub pid: u16,
    pub product: Option<String>,
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.usb {
            Some(usb) => write!(
                f,
                "{} (USB {:04x}:{:04x}{})",
                self.path,
                usb.vid,
                usb.pid,
                usb.product
                    .as_deref()
                    .map(|p| format!(" {p}"))
                    .unwrap_or_default()
            ),
            None => write!(f, "{}", self.path),
        }
    }
}

pub trait PortEnumerator {
    fn available_ports(&self) -> Result<Vec<PortInfo>, PortSelectError>;
}

pub trait PortPrompt {
    /// Returns the index into `ports` the user chose.
    fn choose(&mut self, ports: &[PortInfo]) -> Result<usize, PortSelectError>;
}

/// Lists ports through `serialport::available_ports`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> Result<Vec<PortInfo>, PortSelectError> {
        let ports = serialport::available_ports()?
            .into_iter()
            .map(|p| PortInfo {
                path: p.port_name,
                usb: match p.port_type {
                    serialport::SerialPortType::UsbPort(usb) => Some(UsbDetails {
                        vid: usb.vid,
                        pid: usb.pid,
                        product: usb.product,
                    }),
                    _ => None,
                },
            })
            .collect();
        Ok(ports)
    }
}

/// Numbered menu over any reader and writer, stdin and stderr by default.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LinePrompt<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> PortPrompt for LinePrompt<R, W> {
    fn choose(&mut self, ports: &[PortInfo]) -> Result<usize, PortSelectError> {
        writeln!(self.output, "Available serial ports:")?;
        for (i, port) in ports.iter().enumerate() {
            writeln!(self.output, "  [{}] {port}", i + 1)?;
        }
        write!(self.output, "Select a port (1-{}): ", ports.len())?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;
        let answer = line.trim();
        match answer.parse::<usize>() {
            Ok(n) if (1..=ports.len()).contains(&n) => Ok(n - 1),
            _ => Err(PortSelectError::InvalidChoice(answer.to_string())),
        }
    }
}

/// Finds the display's port on this machine, prompting on stdin if needed.
pub fn ask_for_serial_port() -> Result<SerialPortSpec, PortSelectError> {
    ask_for_serial_port_with(&SystemPorts, &mut LinePrompt::stdio())
}

/// [`ask_for_serial_port`] with injected enumeration and prompt.
pub fn ask_for_serial_port_with(
    enumerator: &dyn PortEnumerator,
    prompt: &mut dyn PortPrompt,
) -> Result<SerialPortSpec, PortSelectError> {
    let ports = enumerator.available_ports()?;
    debug!(count = ports.len(), "enumerated serial ports");

    if ports.is_empty() {
        return Err(PortSelectError::NoPorts);
    }

    let usb: Vec<&PortInfo> = ports.iter().filter(|p| p.usb.is_some()).collect();
    if let [only] = usb.as_slice() {
        info!(port = %only, "auto-selected the only USB serial port");
        return Ok(SerialPortSpec::new(only.path.clone()));
    }

    let index = prompt.choose(&ports)?;
    let chosen = ports
        .get(index)
        .ok_or_else(|| PortSelectError::InvalidChoice(index.to_string()))?;
    info!(port = %chosen, "serial port selected");
    Ok(SerialPortSpec::new(chosen.path.clone()))
}
