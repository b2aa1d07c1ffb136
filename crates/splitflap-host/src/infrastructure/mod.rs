//! Infrastructure layer for the splitflap driver.
//!
//! Contains the OS-facing adapters: the serial transport (and its simulated
//! stand-in), serial port discovery, and config file storage.

pub mod port_select;
pub mod storage;
pub mod transport;
