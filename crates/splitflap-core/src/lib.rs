//! # splitflap-core
//!
//! Shared library for the splitflap serial driver: the binary frame codec,
//! typed protocol messages, and the host-side model of a display.
//!
//! It has no dependencies on serial ports or any other OS API, so everything
//! in here can be tested on any machine.
//!
//! - **`protocol`** – How bytes travel over the serial line. Messages are
//!   wrapped in CRC-checked, SLIP-delimited frames and decoded back into
//!   typed requests and responses.
//!
//! - **`domain`** – The alphabet a device can render and the cache of what
//!   the host knows about the device (module count, alphabet, last text).

pub mod domain;
pub mod protocol;

pub use domain::alphabet::{Alphabet, AlphabetError, TextError, BLANK};
pub use domain::device_state::{Capabilities, DeviceState};
pub use protocol::frame::{decode_frame, encode_frame, Frame, FrameDecoder, FrameError};
pub use protocol::messages::{
    MessageType, ModuleState, ModuleStatus, NackCode, ProtocolError, Request, Response,
    MAX_MODULES,
};
