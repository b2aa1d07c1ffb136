//! Frame codec for the splitflap serial protocol.
//!
//! Inner frame layout (before byte stuffing):
//! ```text
//! [type:1][seq:1][len:2][payload:len][crc16:2]
//! ```
//! Multi-byte integers are big-endian. The CRC is CRC-16/CCITT-FALSE over
//! every byte that precedes it.
//!
//! On the wire each inner frame is wrapped SLIP-style:
//! ```text
//! END <escaped inner frame> END
//! ```
//! `END` doubles as start and end delimiter, so a receiver that lost sync
//! only has to wait for the next `END` to line up with the stream again.

use thiserror::Error;
use tracing::trace;

// ── Wire constants ────────────────────────────────────────────────────────────

/// Frame delimiter.
pub const FRAME_END: u8 = 0xC0;
/// Escape marker.
pub const FRAME_ESC: u8 = 0xDB;
/// Follows [`FRAME_ESC`] to encode a literal [`FRAME_END`].
pub const FRAME_ESC_END: u8 = 0xDC;
/// Follows [`FRAME_ESC`] to encode a literal [`FRAME_ESC`].
pub const FRAME_ESC_ESC: u8 = 0xDD;

/// `type` + `seq` + `len`.
pub const HEADER_LEN: usize = 4;
/// Size of the CRC trailer.
pub const CRC_LEN: usize = 2;
/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Largest unescaped inner frame.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CRC_LEN;

/// Why a received frame was rejected as corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// The CRC trailer does not match the frame contents.
    ChecksumMismatch { received: u16, computed: u16 },
    /// An escape marker was followed by a byte that is not an escape code.
    InvalidEscape(u8),
    /// The frame grew past [`MAX_FRAME_LEN`] before a delimiter arrived.
    Oversized,
    /// The frame holds more bytes than its length field declares.
    TrailingBytes { declared: usize, received: usize },
}

/// Errors produced by the frame codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame failed its integrity check; its payload must not be trusted.
    #[error("corrupt frame: {0:?}")]
    Corrupt(Corruption),

    /// Fewer bytes arrived than the frame requires.
    #[error("incomplete frame: need {needed} bytes, got {available}")]
    Incomplete { needed: usize, available: usize },

    /// The caller tried to encode a payload above [`MAX_PAYLOAD_LEN`].
    #[error("payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN}-byte limit")]
    PayloadTooLarge { len: usize },
}

/// One protocol message unit.
///
/// `frame_type` is kept as a raw byte here; [`crate::protocol::messages`]
/// maps it onto typed requests and responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: u8, seq: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            seq,
            payload,
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `frame` into its delimited, escaped wire form.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`].
///
/// # Examples
///
/// ```rust
/// use splitflap_core::protocol::frame::{decode_frame, encode_frame, Frame};
///
/// let frame = Frame::new(0x03, 7, vec![0xC0, 0x01, 0xDB]);
/// let wire = encode_frame(&frame).unwrap();
/// assert_eq!(decode_frame(&wire).unwrap(), frame);
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let inner = encode_inner(frame)?;
    let mut out = Vec::with_capacity(inner.len() + inner.len() / 8 + 2);
    out.push(FRAME_END);
    for &byte in &inner {
        match byte {
            FRAME_END => out.extend_from_slice(&[FRAME_ESC, FRAME_ESC_END]),
            FRAME_ESC => out.extend_from_slice(&[FRAME_ESC, FRAME_ESC_ESC]),
            other => out.push(other),
        }
    }
    out.push(FRAME_END);
    Ok(out)
}

fn encode_inner(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let len = frame.payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + len + CRC_LEN);
    buf.push(frame.frame_type);
    buf.push(frame.seq);
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    let crc = crc16_ccitt_false(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(buf)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Parses an unescaped inner frame (delimiters already stripped).
fn parse_inner(buf: &[u8]) -> Result<Frame, FrameError> {
    if buf.len() < HEADER_LEN + CRC_LEN {
        return Err(FrameError::Incomplete {
            needed: HEADER_LEN + CRC_LEN,
            available: buf.len(),
        });
    }

    let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::Corrupt(Corruption::Oversized));
    }
    let total = HEADER_LEN + payload_len + CRC_LEN;
    if buf.len() < total {
        return Err(FrameError::Incomplete {
            needed: total,
            available: buf.len(),
        });
    }
    if buf.len() > total {
        return Err(FrameError::Corrupt(Corruption::TrailingBytes {
            declared: payload_len,
            received: buf.len() - HEADER_LEN - CRC_LEN,
        }));
    }

    let body_end = HEADER_LEN + payload_len;
    let received = u16::from_be_bytes([buf[body_end], buf[body_end + 1]]);
    let computed = crc16_ccitt_false(&buf[..body_end]);
    if received != computed {
        return Err(FrameError::Corrupt(Corruption::ChecksumMismatch {
            received,
            computed,
        }));
    }

    Ok(Frame {
        frame_type: buf[0],
        seq: buf[1],
        payload: buf[HEADER_LEN..body_end].to_vec(),
    })
}

/// Bytes needed to complete the partial inner frame in `buf`.
fn needed_for(buf: &[u8]) -> usize {
    if buf.len() >= HEADER_LEN {
        let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        HEADER_LEN + payload_len.min(MAX_PAYLOAD_LEN) + CRC_LEN
    } else {
        HEADER_LEN + CRC_LEN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Discarding bytes until the next delimiter.
    Hunting,
    /// Collecting an inner frame.
    Receiving { escaping: bool },
}

/// Streaming decoder that turns a byte stream into frames.
///
/// Bytes are fed with [`push`](Self::push) as they arrive from the transport.
/// After a corrupt or incomplete frame the decoder drops everything up to the
/// next delimiter before it accepts data again.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    state: DecoderState,
}

impl FrameDecoder {
    /// Creates a decoder that waits for a delimiter before collecting bytes.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
            state: DecoderState::Hunting,
        }
    }

    /// Feeds `bytes` into the decoder and returns every frame (or framing
    /// error) completed by them, in stream order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Frame, FrameError>> {
        let mut out = Vec::new();
        for &byte in bytes {
            if let Some(result) = self.push_byte(byte) {
                out.push(result);
            }
        }
        out
    }

    fn push_byte(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        match self.state {
            DecoderState::Hunting => {
                if byte == FRAME_END {
                    self.buffer.clear();
                    self.state = DecoderState::Receiving { escaping: false };
                }
                None
            }
            DecoderState::Receiving { escaping } => {
                if byte == FRAME_END {
                    // The delimiter also opens the next frame.
                    self.state = DecoderState::Receiving { escaping: false };
                    if escaping {
                        self.buffer.clear();
                        return Some(Err(FrameError::Corrupt(Corruption::InvalidEscape(byte))));
                    }
                    if self.buffer.is_empty() {
                        return None;
                    }
                    let result = parse_inner(&self.buffer);
                    self.buffer.clear();
                    return Some(result);
                }

                let decoded = if escaping {
                    self.state = DecoderState::Receiving { escaping: false };
                    match byte {
                        FRAME_ESC_END => FRAME_END,
                        FRAME_ESC_ESC => FRAME_ESC,
                        other => {
                            return Some(Err(
                                self.resync(Corruption::InvalidEscape(other))
                            ));
                        }
                    }
                } else if byte == FRAME_ESC {
                    self.state = DecoderState::Receiving { escaping: true };
                    return None;
                } else {
                    byte
                };

                if self.buffer.len() >= MAX_FRAME_LEN {
                    return Some(Err(self.resync(Corruption::Oversized)));
                }
                self.buffer.push(decoded);
                None
            }
        }
    }

    fn resync(&mut self, reason: Corruption) -> FrameError {
        trace!(?reason, discarded = self.buffer.len(), "frame decoder resynchronising");
        self.buffer.clear();
        self.state = DecoderState::Hunting;
        FrameError::Corrupt(reason)
    }

    /// Called when the caller gave up waiting for more bytes.
    ///
    /// Returns [`FrameError::Incomplete`] if a partial frame was pending and
    /// puts the decoder back into hunting for the next delimiter.
    pub fn expire(&mut self) -> Option<FrameError> {
        let pending = matches!(self.state, DecoderState::Receiving { .. }) && !self.buffer.is_empty();
        if !pending {
            return None;
        }
        let err = FrameError::Incomplete {
            needed: needed_for(&self.buffer),
            available: self.buffer.len(),
        };
        self.buffer.clear();
        self.state = DecoderState::Hunting;
        Some(err)
    }

    /// Returns `true` if part of a frame has been received.
    pub fn has_partial_frame(&self) -> bool {
        matches!(self.state, DecoderState::Receiving { .. }) && !self.buffer.is_empty()
    }

    /// Drops all buffered bytes and waits for the next delimiter.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecoderState::Hunting;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes the first frame in a complete wire buffer.
///
/// # Errors
///
/// Returns the first framing error in `wire`, or [`FrameError::Incomplete`]
/// if `wire` ends before a frame is closed.
pub fn decode_frame(wire: &[u8]) -> Result<Frame, FrameError> {
    let mut decoder = FrameDecoder::new();
    if let Some(first) = decoder.push(wire).into_iter().next() {
        return first;
    }
    Err(decoder.expire().unwrap_or(FrameError::Incomplete {
        needed: HEADER_LEN + CRC_LEN,
        available: 0,
    }))
}

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xor-out.
pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stuff(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![FRAME_END];
        for &b in inner {
            match b {
                FRAME_END => out.extend_from_slice(&[FRAME_ESC, FRAME_ESC_END]),
                FRAME_ESC => out.extend_from_slice(&[FRAME_ESC, FRAME_ESC_ESC]),
                other => out.push(other),
            }
        }
        out.push(FRAME_END);
        out
    }

    #[test]
    fn test_crc16_matches_reference_check_value() {
        // The standard check input for CRC catalogues.
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_encode_wraps_frame_in_delimiters() {
        let wire = encode_frame(&Frame::new(0x01, 0, vec![])).unwrap();
        assert_eq!(wire.first(), Some(&FRAME_END));
        assert_eq!(wire.last(), Some(&FRAME_END));
        assert_eq!(wire.len(), 2 + HEADER_LEN + CRC_LEN);
    }

    #[test]
    fn test_encode_escapes_reserved_bytes() {
        let wire = encode_frame(&Frame::new(0x03, 1, vec![FRAME_END, FRAME_ESC])).unwrap();
        let body = &wire[1..wire.len() - 1];
        assert!(!body.contains(&FRAME_END), "no raw delimiter inside the frame");
        assert!(body.windows(2).any(|w| w == [FRAME_ESC, FRAME_ESC_END]));
        assert!(body.windows(2).any(|w| w == [FRAME_ESC, FRAME_ESC_ESC]));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(0x03, 0, vec![0; MAX_PAYLOAD_LEN + 1]);
        assert_eq!(
            encode_frame(&frame),
            Err(FrameError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1
            })
        );
    }

    #[test]
    fn test_encode_accepts_maximum_payload() {
        let frame = Frame::new(0x03, 9, vec![0xAA; MAX_PAYLOAD_LEN]);
        let wire = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&wire).unwrap(), frame);
    }

    #[test]
    fn test_decoder_yields_frames_split_across_pushes() {
        let frame = Frame::new(0x82, 4, b"abc".to_vec());
        let wire = encode_frame(&frame).unwrap();
        let (a, b) = wire.split_at(3);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(a).is_empty());
        assert!(decoder.has_partial_frame());
        let results = decoder.push(b);

        assert_eq!(results, vec![Ok(frame)]);
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn test_decoder_yields_back_to_back_frames() {
        let f1 = Frame::new(0x81, 1, vec![0x00, 0x08]);
        let f2 = Frame::new(0x83, 2, vec![]);
        let mut wire = encode_frame(&f1).unwrap();
        wire.extend(encode_frame(&f2).unwrap());

        let results = FrameDecoder::new().push(&wire);

        assert_eq!(results, vec![Ok(f1), Ok(f2)]);
    }

    #[test]
    fn test_decoder_discards_leading_garbage() {
        let frame = Frame::new(0x83, 3, vec![]);
        let mut wire = vec![0x11, 0x22, 0x33];
        wire.extend(encode_frame(&frame).unwrap());

        assert_eq!(FrameDecoder::new().push(&wire), vec![Ok(frame)]);
    }

    #[test]
    fn test_decoder_reports_checksum_mismatch() {
        let mut inner = encode_inner(&Frame::new(0x81, 1, vec![0x00, 0x08])).unwrap();
        let last = inner.len() - 1;
        inner[last] ^= 0x01;

        let results = FrameDecoder::new().push(&stuff(&inner));

        assert!(matches!(
            results.as_slice(),
            [Err(FrameError::Corrupt(Corruption::ChecksumMismatch { .. }))]
        ));
    }

    #[test]
    fn test_decoder_recovers_after_corrupt_frame() {
        let good = Frame::new(0x83, 5, vec![]);
        let mut inner = encode_inner(&Frame::new(0x81, 4, vec![1, 2])).unwrap();
        inner[HEADER_LEN] ^= 0xFF;
        let mut wire = stuff(&inner);
        wire.extend(encode_frame(&good).unwrap());

        let results = FrameDecoder::new().push(&wire);

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::Corrupt(_))));
        assert_eq!(results[1], Ok(good));
    }

    #[test]
    fn test_decoder_rejects_invalid_escape_and_resyncs() {
        let good = Frame::new(0x85, 6, vec![]);
        let mut wire = vec![FRAME_END, 0x81, FRAME_ESC, 0x42, 0x99, 0x98];
        wire.extend(encode_frame(&good).unwrap());

        let results = FrameDecoder::new().push(&wire);

        assert_eq!(
            results,
            vec![
                Err(FrameError::Corrupt(Corruption::InvalidEscape(0x42))),
                Ok(good)
            ]
        );
    }

    #[test]
    fn test_decoder_reports_short_frame_as_incomplete() {
        // Declares a 4-byte payload but only carries one byte plus a CRC.
        let inner = [0x82, 0x01, 0x00, 0x04, b'a', 0x00, 0x00];

        let results = FrameDecoder::new().push(&stuff(&inner));

        assert_eq!(
            results,
            vec![Err(FrameError::Incomplete {
                needed: HEADER_LEN + 4 + CRC_LEN,
                available: inner.len()
            })]
        );
    }

    #[test]
    fn test_expire_reports_pending_partial_frame() {
        let wire = encode_frame(&Frame::new(0x82, 2, b"abcdef".to_vec())).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&wire[..5]);

        let err = decoder.expire();

        assert!(matches!(err, Some(FrameError::Incomplete { needed: 12, .. })));
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn test_expire_discards_tail_until_next_delimiter() {
        let late = encode_frame(&Frame::new(0x82, 2, b"abcdef".to_vec())).unwrap();
        let next = Frame::new(0x83, 3, vec![]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&late[..5]);
        decoder.expire();

        // The tail of the expired frame ends with a delimiter, which opens
        // the next frame.
        let mut rest = late[5..].to_vec();
        rest.extend(encode_frame(&next).unwrap());
        let results = decoder.push(&rest);

        assert_eq!(results, vec![Ok(next)]);
    }

    #[test]
    fn test_expire_without_partial_frame_is_none() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.expire(), None);
        decoder.push(&[FRAME_END]);
        assert_eq!(decoder.expire(), None);
    }

    #[test]
    fn test_decoder_rejects_runaway_frame() {
        let mut wire = vec![FRAME_END];
        wire.extend(std::iter::repeat(0x55).take(MAX_FRAME_LEN + 10));

        let results = FrameDecoder::new().push(&wire);

        assert_eq!(
            results,
            vec![Err(FrameError::Corrupt(Corruption::Oversized))]
        );
    }

    #[test]
    fn test_decode_frame_on_truncated_wire_is_incomplete() {
        let wire = encode_frame(&Frame::new(0x81, 1, vec![0, 8])).unwrap();
        assert!(matches!(
            decode_frame(&wire[..wire.len() - 2]),
            Err(FrameError::Incomplete { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_single_byte_mutation_is_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let inner = encode_inner(&Frame::new(0x03, 1, payload.clone())).unwrap();
            // Mutate payload or CRC; the header is covered by other tests.
            let start = HEADER_LEN;
            let i = start + index.index(inner.len() - start);
            let mut mutated = inner.clone();
            mutated[i] ^= mask;

            let result = decode_frame(&stuff(&mutated));

            prop_assert!(
                matches!(result, Err(FrameError::Corrupt(Corruption::ChecksumMismatch { .. }))),
                "mutation at {} went undetected: {:?}",
                i,
                result
            );
        }
    }
}
