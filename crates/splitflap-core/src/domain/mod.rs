//! Domain model for a splitflap display.
//!
//! Pure data and rules; nothing in here touches a serial port.

pub mod alphabet;
pub mod device_state;
