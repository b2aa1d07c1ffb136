//! Command/response engine: one request frame out, one matching reply in.
//!
//! The protocol is half-duplex. [`CommandEngine::exchange`] writes a frame,
//! then reads until a frame with the same sequence number and the expected
//! response type arrives or the attempt's deadline passes. A timed-out or
//! garbled attempt is retried with a fresh sequence number, so a late reply
//! to an earlier attempt is recognised as stale and dropped.
//!
//! Device log frames can arrive at any time. They are forwarded to `tracing`
//! and do not end the wait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use splitflap_core::protocol::SequenceCounter;
use splitflap_core::{
    encode_frame, Alphabet, Frame, FrameDecoder, FrameError, MessageType, ModuleStatus,
    ProtocolError, Request, Response, BLANK, MAX_MODULES,
};
use tracing::{debug, info, trace, warn};

use crate::error::{SplitflapError, TransportError};
use crate::infrastructure::transport::Transport;

/// Largest chunk requested from the transport per read.
const READ_CHUNK: usize = 256;

/// How long to wait for a reply and how often to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub response_timeout: Duration,
    /// Total number of attempts, including the first one. At least 1.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

/// The one request currently awaiting its reply.
#[derive(Debug, Clone, Copy)]
struct PendingCommand {
    seq: u8,
    expected: MessageType,
    deadline: Instant,
}

/// Outcome of examining one incoming frame.
enum Disposition {
    Matched(Response),
    Ignored,
}

/// Drives request/response exchanges over a [`Transport`].
#[derive(Debug)]
pub struct CommandEngine<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    sequence: SequenceCounter,
    policy: RetryPolicy,
    inbox: VecDeque<Result<Frame, FrameError>>,
}

impl<T: Transport> CommandEngine<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::new(),
            sequence: SequenceCounter::new(),
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            inbox: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends `request` and returns the device's reply.
    ///
    /// # Errors
    ///
    /// - [`SplitflapError::DeviceUnresponsive`] once every attempt timed out
    ///   or was answered with a corrupt or incomplete frame.
    /// - [`SplitflapError::DeviceRejected`] if the device nacked the request;
    ///   this is not retried.
    /// - [`SplitflapError::Transport`] for write or read failures other than
    ///   a timeout.
    pub fn exchange(&mut self, request: &Request) -> Result<Response, SplitflapError> {
        let attempts = self.policy.max_attempts;

        for attempt in 1..=attempts {
            let seq = self.sequence.next();
            let wire = encode_frame(&request.to_frame(seq)).map_err(ProtocolError::from)?;

            debug!(
                request = ?request.message_type(),
                seq,
                attempt,
                "sending request"
            );
            self.transport.write(&wire)?;

            let pending = PendingCommand {
                seq,
                expected: request.expected_response(),
                deadline: Instant::now() + self.policy.response_timeout,
            };
            if let Some(response) = self.await_response(&pending)? {
                debug!(response = ?response.message_type(), seq, "received response");
                return Ok(response);
            }

            if attempt < attempts {
                warn!(
                    request = ?request.message_type(),
                    attempt,
                    "no valid response, retrying"
                );
            }
        }

        warn!(request = ?request.message_type(), attempts, "device unresponsive");
        Err(SplitflapError::DeviceUnresponsive { attempts })
    }

    /// Reads until `pending` is answered. `None` ends the attempt.
    ///
    /// A bad frame is dropped and the wait goes on, since the reply may
    /// still follow it. Only the deadline or a read timeout ends the wait.
    fn await_response(
        &mut self,
        pending: &PendingCommand,
    ) -> Result<Option<Response>, SplitflapError> {
        loop {
            while let Some(item) = self.inbox.pop_front() {
                match item {
                    Ok(frame) => {
                        if let Disposition::Matched(resp) = self.dispose(frame, pending)? {
                            return Ok(Some(resp));
                        }
                    }
                    Err(e) => warn!(error = %e, seq = pending.seq, "discarding bad frame"),
                }
            }

            let remaining = pending.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.expire_partial();
                return Ok(None);
            }

            match self.transport.read(READ_CHUNK, remaining) {
                Ok(bytes) => {
                    trace!(len = bytes.len(), "feeding decoder");
                    self.inbox.extend(self.decoder.push(&bytes));
                }
                Err(TransportError::Timeout(_)) => {
                    self.expire_partial();
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn expire_partial(&mut self) {
        if let Some(e) = self.decoder.expire() {
            warn!(error = %e, "dropping partial frame at deadline");
        }
    }

    fn dispose(
        &self,
        frame: Frame,
        pending: &PendingCommand,
    ) -> Result<Disposition, SplitflapError> {
        let response = match Response::from_frame(&frame) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "ignoring unparseable frame");
                return Ok(Disposition::Ignored);
            }
        };

        if let Response::Log(line) = &response {
            info!(target: "splitflap::device", "{line}");
            return Ok(Disposition::Ignored);
        }
        if frame.seq != pending.seq {
            debug!(seq = frame.seq, expected = pending.seq, "dropping stale frame");
            return Ok(Disposition::Ignored);
        }
        if let Response::Nack(code) = response {
            warn!(?code, seq = frame.seq, "device rejected request");
            return Err(SplitflapError::DeviceRejected(code));
        }
        if response.message_type() != pending.expected {
            warn!(
                got = ?response.message_type(),
                expected = ?pending.expected,
                "ignoring response of unexpected type"
            );
            return Ok(Disposition::Ignored);
        }
        Ok(Disposition::Matched(response))
    }

    // ── Typed operations ──────────────────────────────────────────────────────

    pub fn query_module_count(&mut self) -> Result<usize, SplitflapError> {
        match self.exchange(&Request::QueryModuleCount)? {
            Response::ModuleCount(0) => Err(SplitflapError::Handshake(
                "device reports zero modules".to_string(),
            )),
            Response::ModuleCount(n) if usize::from(n) > MAX_MODULES => {
                Err(SplitflapError::Handshake(format!(
                    "device reports {n} modules; at most {MAX_MODULES} fit in one frame"
                )))
            }
            Response::ModuleCount(n) => Ok(usize::from(n)),
            other => Err(unexpected(&other)),
        }
    }

    pub fn query_alphabet(&mut self) -> Result<Alphabet, SplitflapError> {
        match self.exchange(&Request::QueryAlphabet)? {
            Response::Alphabet(symbols) => {
                let alphabet =
                    Alphabet::new(symbols).map_err(|e| SplitflapError::Handshake(e.to_string()))?;
                if !alphabet.has_blank() {
                    return Err(SplitflapError::Handshake(format!(
                        "alphabet has no blank symbol {BLANK:?}"
                    )));
                }
                Ok(alphabet)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Sends already-validated flap indices.
    pub fn set_text(&mut self, flap_indices: Vec<u8>) -> Result<(), SplitflapError> {
        match self.exchange(&Request::SetText(flap_indices))? {
            Response::TextAck => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn query_state(&mut self) -> Result<Vec<ModuleStatus>, SplitflapError> {
        match self.exchange(&Request::QueryState)? {
            Response::ModuleStates(statuses) => Ok(statuses),
            other => Err(unexpected(&other)),
        }
    }

    pub fn reset_modules(&mut self) -> Result<(), SplitflapError> {
        match self.exchange(&Request::ResetModules)? {
            Response::ResetAck => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn close(&mut self) -> Result<(), TransportError> {
        self.inbox.clear();
        self.decoder.reset();
        self.transport.close()
    }
}

fn unexpected(response: &Response) -> SplitflapError {
    SplitflapError::Protocol(ProtocolError::MalformedPayload(format!(
        "unexpected {:?} reply",
        response.message_type()
    )))
}
