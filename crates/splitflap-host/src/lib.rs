//! splitflap-host library entry point.
//!
//! Host-side driver for splitflap display controllers on a serial port.
//! The binary entry point in `main.rs` and the integration tests in `tests/`
//! share this module tree.
//!
//! The caller-facing operations are re-exported here:
//! [`ask_for_serial_port`], [`splitflap_context`] (and its scoped form
//! [`with_session`]), and on [`Session`]: `get_num_modules`, `get_alphabet`
//! and `set_text`.

pub mod application;
pub mod error;
pub mod infrastructure;

pub use application::engine::{CommandEngine, RetryPolicy};
pub use application::session::{splitflap_context, with_session, Session};
pub use error::{SplitflapError, TransportError};
pub use infrastructure::port_select::{ask_for_serial_port, PortSelectError};
pub use infrastructure::transport::{SerialPortSpec, Transport};
