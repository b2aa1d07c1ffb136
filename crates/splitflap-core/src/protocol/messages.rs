//! Typed protocol messages and their payload encoding.
//!
//! Requests travel host → device, responses device → host. Every request has
//! exactly one response kind; the device may additionally emit [`Response::Log`]
//! frames at any time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::frame::{Frame, FrameError, MAX_PAYLOAD_LEN};

/// Errors raised while mapping frames onto typed messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame type byte is not part of the protocol.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The frame type is valid but belongs to the other direction.
    #[error("unexpected message type {0:?} for this direction")]
    WrongDirection(MessageType),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The frame itself could not be built or read.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ── Message type codes ────────────────────────────────────────────────────────

/// Frame type bytes defined by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Host → device (0x01–0x7F)
    QueryModuleCount = 0x01,
    QueryAlphabet = 0x02,
    SetText = 0x03,
    QueryState = 0x04,
    ResetModules = 0x05,
    // Device → host (0x80–0xFF)
    ModuleCount = 0x81,
    Alphabet = 0x82,
    TextAck = 0x83,
    ModuleStates = 0x84,
    ResetAck = 0x85,
    Log = 0xF0,
    Nack = 0xFF,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::QueryModuleCount),
            0x02 => Ok(MessageType::QueryAlphabet),
            0x03 => Ok(MessageType::SetText),
            0x04 => Ok(MessageType::QueryState),
            0x05 => Ok(MessageType::ResetModules),
            0x81 => Ok(MessageType::ModuleCount),
            0x82 => Ok(MessageType::Alphabet),
            0x83 => Ok(MessageType::TextAck),
            0x84 => Ok(MessageType::ModuleStates),
            0x85 => Ok(MessageType::ResetAck),
            0xF0 => Ok(MessageType::Log),
            0xFF => Ok(MessageType::Nack),
            _ => Err(()),
        }
    }
}

impl MessageType {
    /// Returns `true` for types the host sends.
    pub fn is_request(self) -> bool {
        (self as u8) < 0x80
    }
}

fn message_type_of(frame: &Frame) -> Result<MessageType, ProtocolError> {
    MessageType::try_from(frame.frame_type)
        .map_err(|_| ProtocolError::UnknownMessageType(frame.frame_type))
}

// ── Module status ─────────────────────────────────────────────────────────────

/// Size of one module record in a `ModuleStates` payload.
pub const MODULE_STATUS_LEN: usize = 6;

/// Largest display whose `ModuleStates` reply (count plus one record per
/// module) and `SetText` request still fit in one frame.
pub const MAX_MODULES: usize = (MAX_PAYLOAD_LEN - 2) / MODULE_STATUS_LEN;

/// Mechanical state reported for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModuleState {
    Normal = 0,
    LookingForHome = 1,
    SensorError = 2,
    Panic = 3,
    Disabled = 4,
}

impl TryFrom<u8> for ModuleState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(ModuleState::Normal),
            1 => Ok(ModuleState::LookingForHome),
            2 => Ok(ModuleState::SensorError),
            3 => Ok(ModuleState::Panic),
            4 => Ok(ModuleState::Disabled),
            _ => Err(()),
        }
    }
}

/// Last known status of one splitflap module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    /// Index into the alphabet of the flap currently showing.
    pub flap_index: u8,
    pub state: ModuleState,
    /// Whether the module is still spinning towards its target.
    pub moving: bool,
    /// Home sensor triggered where it was not expected.
    pub count_unexpected_home: u8,
    /// Home sensor did not trigger when expected.
    pub count_missed_home: u8,
}

// ── Nack codes ────────────────────────────────────────────────────────────────

/// Reason the device gave for refusing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NackCode {
    UnknownCommand = 0x01,
    InvalidPayload = 0x02,
    Busy = 0x03,
    ModuleFault = 0x04,
    Unspecified = 0xFF,
}

impl From<u8> for NackCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => NackCode::UnknownCommand,
            0x02 => NackCode::InvalidPayload,
            0x03 => NackCode::Busy,
            0x04 => NackCode::ModuleFault,
            _ => NackCode::Unspecified,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A command sent from the host to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    QueryModuleCount,
    QueryAlphabet,
    /// One flap index per module, in module order.
    SetText(Vec<u8>),
    QueryState,
    /// Clears module faults and re-homes every module.
    ResetModules,
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::QueryModuleCount => MessageType::QueryModuleCount,
            Request::QueryAlphabet => MessageType::QueryAlphabet,
            Request::SetText(_) => MessageType::SetText,
            Request::QueryState => MessageType::QueryState,
            Request::ResetModules => MessageType::ResetModules,
        }
    }

    /// The response type that completes this request.
    pub fn expected_response(&self) -> MessageType {
        match self {
            Request::QueryModuleCount => MessageType::ModuleCount,
            Request::QueryAlphabet => MessageType::Alphabet,
            Request::SetText(_) => MessageType::TextAck,
            Request::QueryState => MessageType::ModuleStates,
            Request::ResetModules => MessageType::ResetAck,
        }
    }

    /// Builds the frame for this request with sequence number `seq`.
    pub fn to_frame(&self, seq: u8) -> Frame {
        let payload = match self {
            Request::SetText(indices) => indices.clone(),
            _ => Vec::new(),
        };
        Frame::new(self.message_type() as u8, seq, payload)
    }

    /// Parses a request frame (used by device simulators).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown, response-direction, or
    /// malformed frames.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let ty = message_type_of(frame)?;
        let expect_empty = |req: Request| {
            if frame.payload.is_empty() {
                Ok(req)
            } else {
                Err(ProtocolError::MalformedPayload(format!(
                    "{ty:?} carries no payload, got {} bytes",
                    frame.payload.len()
                )))
            }
        };
        match ty {
            MessageType::QueryModuleCount => expect_empty(Request::QueryModuleCount),
            MessageType::QueryAlphabet => expect_empty(Request::QueryAlphabet),
            MessageType::SetText => Ok(Request::SetText(frame.payload.clone())),
            MessageType::QueryState => expect_empty(Request::QueryState),
            MessageType::ResetModules => expect_empty(Request::ResetModules),
            other => Err(ProtocolError::WrongDirection(other)),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// A message sent from the controller to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ModuleCount(u16),
    /// Renderable symbols in flap order.
    Alphabet(Vec<char>),
    TextAck,
    ModuleStates(Vec<ModuleStatus>),
    ResetAck,
    /// Free-form diagnostic text, sent unsolicited.
    Log(String),
    Nack(NackCode),
}

impl Response {
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::ModuleCount(_) => MessageType::ModuleCount,
            Response::Alphabet(_) => MessageType::Alphabet,
            Response::TextAck => MessageType::TextAck,
            Response::ModuleStates(_) => MessageType::ModuleStates,
            Response::ResetAck => MessageType::ResetAck,
            Response::Log(_) => MessageType::Log,
            Response::Nack(_) => MessageType::Nack,
        }
    }

    /// Builds the frame for this response with sequence number `seq`.
    pub fn to_frame(&self, seq: u8) -> Frame {
        let mut payload = Vec::new();
        match self {
            Response::ModuleCount(n) => payload.extend_from_slice(&n.to_be_bytes()),
            Response::Alphabet(symbols) => {
                payload.extend(symbols.iter().collect::<String>().into_bytes())
            }
            Response::TextAck | Response::ResetAck => {}
            Response::ModuleStates(modules) => {
                payload.extend_from_slice(&(modules.len() as u16).to_be_bytes());
                for m in modules {
                    payload.push(m.flap_index);
                    payload.push(m.state as u8);
                    payload.push(u8::from(m.moving));
                    payload.push(0x00); // home state, reserved
                    payload.push(m.count_unexpected_home);
                    payload.push(m.count_missed_home);
                }
            }
            Response::Log(text) => payload.extend_from_slice(text.as_bytes()),
            Response::Nack(code) => payload.push(*code as u8),
        }
        Frame::new(self.message_type() as u8, seq, payload)
    }

    /// Parses a response frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown, request-direction, or
    /// malformed frames.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let ty = message_type_of(frame)?;
        let p = frame.payload.as_slice();
        match ty {
            MessageType::ModuleCount => {
                require_exact(p, 2, "ModuleCount")?;
                Ok(Response::ModuleCount(u16::from_be_bytes([p[0], p[1]])))
            }
            MessageType::Alphabet => {
                let text = std::str::from_utf8(p).map_err(|e| {
                    ProtocolError::MalformedPayload(format!("alphabet is not UTF-8: {e}"))
                })?;
                Ok(Response::Alphabet(text.chars().collect()))
            }
            MessageType::TextAck => {
                require_exact(p, 0, "TextAck")?;
                Ok(Response::TextAck)
            }
            MessageType::ModuleStates => decode_module_states(p).map(Response::ModuleStates),
            MessageType::ResetAck => {
                require_exact(p, 0, "ResetAck")?;
                Ok(Response::ResetAck)
            }
            MessageType::Log => Ok(Response::Log(String::from_utf8_lossy(p).into_owned())),
            MessageType::Nack => {
                require_exact(p, 1, "Nack")?;
                Ok(Response::Nack(NackCode::from(p[0])))
            }
            other => Err(ProtocolError::WrongDirection(other)),
        }
    }
}

fn decode_module_states(p: &[u8]) -> Result<Vec<ModuleStatus>, ProtocolError> {
    if p.len() < 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "ModuleStates: need 2 bytes for count, got {}",
            p.len()
        )));
    }
    let count = u16::from_be_bytes([p[0], p[1]]) as usize;
    require_exact(p, 2 + count * MODULE_STATUS_LEN, "ModuleStates")?;

    p[2..]
        .chunks_exact(MODULE_STATUS_LEN)
        .map(|rec| {
            let state = ModuleState::try_from(rec[1]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown module state: {}", rec[1]))
            })?;
            Ok(ModuleStatus {
                flap_index: rec[0],
                state,
                moving: rec[2] != 0,
                count_unexpected_home: rec[4],
                count_missed_home: rec[5],
            })
        })
        .collect()
}

fn require_exact(buf: &[u8], len: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() != len {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: expected {len} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
