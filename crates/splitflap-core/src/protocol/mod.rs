//! Wire protocol: frame codec, message types, and sequence numbering.

pub mod frame;
pub mod messages;
pub mod sequence;

pub use frame::{decode_frame, encode_frame, Frame, FrameDecoder, FrameError};
pub use messages::*;
pub use sequence::SequenceCounter;
