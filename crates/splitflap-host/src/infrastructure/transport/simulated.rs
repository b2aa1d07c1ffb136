//! Simulated splitflap controller for tests and hardware-free runs.
//!
//! [`SimulatedDevice`] decodes every request written to it and queues the
//! reply a real controller would send. A cloned [`DeviceHandle`] stays with
//! the test after the device has been moved into a session; it scripts
//! faults (silence, corruption, nacks, log chatter) and exposes counters for
//! writes, reads and closes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use splitflap_core::{
    encode_frame, FrameDecoder, ModuleState, ModuleStatus, NackCode, Request, Response,
};

use super::Transport;
use crate::error::TransportError;

#[derive(Debug, Default)]
struct Shared {
    // Script
    silent_requests: u32,
    corrupt_replies: u32,
    stale_replies: u32,
    nack_next: Option<NackCode>,
    logs_before_reply: Vec<String>,
    // Observations
    writes: usize,
    reads: usize,
    closes: usize,
    requests: Vec<Request>,
    flaps: Vec<u8>,
}

/// In-memory stand-in for the controller firmware.
#[derive(Debug)]
pub struct SimulatedDevice {
    num_modules: u16,
    alphabet: Vec<char>,
    decoder: FrameDecoder,
    outbox: VecDeque<u8>,
    closed: bool,
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedDevice {
    /// A device with `num_modules` modules showing symbols from `alphabet`,
    /// all at flap index 0.
    pub fn new(num_modules: u16, alphabet: &str) -> Self {
        let shared = Shared {
            flaps: vec![0; usize::from(num_modules)],
            ..Shared::default()
        };
        Self {
            num_modules,
            alphabet: alphabet.chars().collect(),
            decoder: FrameDecoder::new(),
            outbox: VecDeque::new(),
            closed: false,
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    /// Handle for scripting and inspecting the device after it is moved.
    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            shared: Arc::clone(&self.shared),
            alphabet: self.alphabet.clone(),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, request: &Request, shared: &mut Shared) -> Response {
        if let Some(code) = shared.nack_next.take() {
            return Response::Nack(code);
        }
        match request {
            Request::QueryModuleCount => Response::ModuleCount(self.num_modules),
            Request::QueryAlphabet => Response::Alphabet(self.alphabet.clone()),
            Request::SetText(indices) => {
                let valid = indices.len() == usize::from(self.num_modules)
                    && indices.iter().all(|&i| usize::from(i) < self.alphabet.len());
                if !valid {
                    return Response::Nack(NackCode::InvalidPayload);
                }
                shared.flaps = indices.clone();
                Response::TextAck
            }
            Request::QueryState => Response::ModuleStates(
                shared
                    .flaps
                    .iter()
                    .map(|&flap_index| ModuleStatus {
                        flap_index,
                        state: ModuleState::Normal,
                        moving: false,
                        count_unexpected_home: 0,
                        count_missed_home: 0,
                    })
                    .collect(),
            ),
            Request::ResetModules => Response::ResetAck,
        }
    }

    fn queue(&mut self, response: &Response, seq: u8) {
        // Responses built here are always within the payload limit.
        if let Ok(wire) = encode_frame(&response.to_frame(seq)) {
            self.outbox.extend(wire);
        }
    }

    fn handle_request(&mut self, request: Request, seq: u8) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.requests.push(request.clone());

        if shared.silent_requests > 0 {
            shared.silent_requests -= 1;
            return;
        }

        let logs = std::mem::take(&mut shared.logs_before_reply);
        let stale = shared.stale_replies > 0;
        if stale {
            shared.stale_replies -= 1;
        }
        let corrupt = shared.corrupt_replies > 0;
        if corrupt {
            shared.corrupt_replies -= 1;
        }
        let response = self.answer(&request, &mut shared);
        drop(shared);

        for line in logs {
            self.queue(&Response::Log(line), 0);
        }
        if stale {
            self.queue(&response, seq.wrapping_sub(1));
        }
        if corrupt {
            let start = self.outbox.len();
            self.queue(&response, seq);
            // Flip a bit in the type byte, right after the opening delimiter.
            if let Some(byte) = self.outbox.get_mut(start + 1) {
                *byte ^= 0x01;
            }
        } else {
            self.queue(&response, seq);
        }
    }
}

impl Transport for SimulatedDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.shared().writes += 1;

        for decoded in self.decoder.push(bytes) {
            let Ok(frame) = decoded else { continue };
            match Request::from_frame(&frame) {
                Ok(request) => self.handle_request(request, frame.seq),
                Err(_) => self.queue(&Response::Nack(NackCode::UnknownCommand), frame.seq),
            }
        }
        Ok(())
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.shared().reads += 1;

        if self.outbox.is_empty() {
            return Err(TransportError::Timeout(timeout));
        }
        let n = max_bytes.max(1).min(self.outbox.len());
        Ok(self.outbox.drain(..n).collect())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.shared().closes += 1;
        self.closed = true;
        self.outbox.clear();
        Ok(())
    }
}

/// Test-side view of a [`SimulatedDevice`].
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    shared: Arc<Mutex<Shared>>,
    alphabet: Vec<char>,
}

impl DeviceHandle {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ignores the next `requests` requests entirely.
    pub fn go_silent(&self, requests: u32) {
        self.shared().silent_requests = requests;
    }

    /// Corrupts the checksum-protected bytes of the next `replies` replies.
    pub fn corrupt_replies(&self, replies: u32) {
        self.shared().corrupt_replies = replies;
    }

    /// Sends a copy of the next `replies` replies tagged with the previous
    /// sequence number before the real one.
    pub fn send_stale_replies(&self, replies: u32) {
        self.shared().stale_replies = replies;
    }

    /// Refuses the next request with `code`.
    pub fn nack_next(&self, code: NackCode) {
        self.shared().nack_next = Some(code);
    }

    /// Emits a log frame before the next reply.
    pub fn log_before_next_reply(&self, line: impl Into<String>) {
        self.shared().logs_before_reply.push(line.into());
    }

    pub fn write_count(&self) -> usize {
        self.shared().writes
    }

    pub fn read_count(&self) -> usize {
        self.shared().reads
    }

    pub fn close_count(&self) -> usize {
        self.shared().closes
    }

    /// Every request decoded so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.shared().requests.clone()
    }

    /// What the modules currently show.
    pub fn displayed_text(&self) -> String {
        self.shared()
            .flaps
            .iter()
            .map(|&i| self.alphabet.get(usize::from(i)).copied().unwrap_or(' '))
            .collect()
    }
}
