//! Session context: a ready-to-use connection to one splitflap display.
//!
//! Opening a session performs the capability handshake (module count, then
//! alphabet) and caches the result. Closing it releases the transport, and
//! that happens exactly once on every exit path: an explicit
//! [`Session::close`], a drop at the end of a scope, an early `?` return or a
//! panic unwinding through the owner.
//!
//! All operations take `&self`. The engine sits behind a mutex so concurrent
//! callers are serialized and at most one command is ever in flight.
//!
//! # Example
//!
//! ```rust,no_run
//! use splitflap_host::{ask_for_serial_port, with_session, RetryPolicy};
//!
//! let port = ask_for_serial_port()?;
//! with_session(&port, RetryPolicy::default(), |session| {
//!     let blanks = " ".repeat(session.get_num_modules()?);
//!     session.set_text(&blanks)
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use splitflap_core::{Alphabet, Capabilities, DeviceState, ModuleStatus, TextError};
use tracing::{debug, info, warn};

use crate::application::engine::{CommandEngine, RetryPolicy};
use crate::error::{SplitflapError, TransportError};
use crate::infrastructure::transport::serial::SerialTransport;
use crate::infrastructure::transport::{SerialPortSpec, Transport};

/// An open, handshaken connection to a display.
#[derive(Debug)]
pub struct Session<T: Transport> {
    engine: Mutex<CommandEngine<T>>,
    state: Mutex<DeviceState>,
    closed: AtomicBool,
}

impl<T: Transport> Session<T> {
    /// Runs the handshake over `transport` and returns a ready session.
    ///
    /// # Errors
    ///
    /// Any error from the handshake. The transport is closed before the
    /// error is returned.
    pub fn establish(transport: T, policy: RetryPolicy) -> Result<Self, SplitflapError> {
        let mut engine = CommandEngine::new(transport, policy);

        let capabilities = match handshake(&mut engine) {
            Ok(caps) => caps,
            Err(e) => {
                warn!(error = %e, "handshake failed, closing transport");
                if let Err(close_err) = engine.close() {
                    warn!(error = %close_err, "failed to close transport");
                }
                return Err(e);
            }
        };

        info!(
            modules = capabilities.num_modules,
            alphabet = %capabilities.alphabet,
            "splitflap session ready"
        );
        let mut state = DeviceState::new();
        state.set_capabilities(capabilities);

        Ok(Self {
            engine: Mutex::new(engine),
            state: Mutex::new(state),
            closed: AtomicBool::new(false),
        })
    }

    /// Establishes a session, runs `f` with it and closes it afterwards.
    ///
    /// The error from `f` wins over a close error.
    pub fn scoped<R>(
        transport: T,
        policy: RetryPolicy,
        f: impl FnOnce(&Session<T>) -> Result<R, SplitflapError>,
    ) -> Result<R, SplitflapError> {
        let session = Self::establish(transport, policy)?;
        let result = f(&session);
        let closed = session.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Number of modules; served from the cache.
    pub fn get_num_modules(&self) -> Result<usize, SplitflapError> {
        self.state().num_modules().ok_or(SplitflapError::NotReady)
    }

    /// Symbols the display can show, in flap order; served from the cache.
    pub fn get_alphabet(&self) -> Result<Alphabet, SplitflapError> {
        self.state().alphabet().cloned().ok_or(SplitflapError::NotReady)
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.state().capabilities().cloned()
    }

    /// Shows `text` on the display, one character per module.
    ///
    /// # Errors
    ///
    /// [`SplitflapError::InvalidText`] when the length differs from the
    /// module count or a character is not in the alphabet; nothing is sent
    /// in that case. [`SplitflapError::NotReady`] after a failed refresh.
    /// Otherwise any engine error, unchanged.
    pub fn set_text(&self, text: &str) -> Result<(), SplitflapError> {
        let chars: Vec<char> = text.chars().collect();
        let mut engine = self.engine();

        let indices = self.state().prepare_text(&chars).map_err(|e| match e {
            TextError::CapabilitiesUnknown => SplitflapError::NotReady,
            other => SplitflapError::InvalidText(other),
        })?;
        engine.set_text(indices)?;

        debug!(text, "text acknowledged");
        self.state().record_text(chars)?;
        Ok(())
    }

    /// The last text the device acknowledged.
    ///
    /// This is what was asked for, not necessarily what the flaps show.
    pub fn last_text(&self) -> Option<String> {
        self.state().last_text().map(|t| t.iter().collect())
    }

    /// Asks the device for the status of every module.
    pub fn request_state(&self) -> Result<Vec<ModuleStatus>, SplitflapError> {
        let mut engine = self.engine();
        let statuses = engine.query_state()?;

        let mut state = self.state();
        if state.num_modules() != Some(statuses.len()) {
            warn!(
                reported = statuses.len(),
                expected = ?state.num_modules(),
                "module state count differs from module count"
            );
        }
        state.record_statuses(statuses.clone());
        Ok(statuses)
    }

    /// Statuses from the last [`request_state`](Self::request_state).
    pub fn module_statuses(&self) -> Option<Vec<ModuleStatus>> {
        self.state().module_statuses().map(<[ModuleStatus]>::to_vec)
    }

    /// Clears module faults and re-homes every module.
    pub fn reset_modules(&self) -> Result<(), SplitflapError> {
        self.engine().reset_modules()?;
        info!("modules reset");
        Ok(())
    }

    /// Forgets the cached capabilities and runs the handshake again.
    ///
    /// If the handshake fails the cache stays empty and the getters return
    /// [`SplitflapError::NotReady`] until a later refresh succeeds.
    pub fn refresh_capabilities(&self) -> Result<Capabilities, SplitflapError> {
        let mut engine = self.engine();
        self.state().invalidate();

        let capabilities = handshake(&mut engine)?;
        self.state().set_capabilities(capabilities.clone());
        info!(modules = capabilities.num_modules, "capabilities refreshed");
        Ok(capabilities)
    }

    /// Closes the transport and ends the session.
    pub fn close(self) -> Result<(), SplitflapError> {
        self.shutdown().map_err(SplitflapError::from)
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.engine().close();
        info!("splitflap session closed");
        result
    }

    // A panic while holding a lock never leaves the engine or the cache half
    // updated, so a poisoned lock is still safe to use.
    fn engine(&self) -> MutexGuard<'_, CommandEngine<T>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "failed to close transport on drop");
        }
    }
}

fn handshake<T: Transport>(engine: &mut CommandEngine<T>) -> Result<Capabilities, SplitflapError> {
    let num_modules = engine.query_module_count()?;
    let alphabet = engine.query_alphabet()?;
    Ok(Capabilities {
        num_modules,
        alphabet,
    })
}

// ── Serial entry points ───────────────────────────────────────────────────────

/// Opens `port` and returns a handshaken session.
///
/// # Errors
///
/// [`SplitflapError::Connection`] or [`SplitflapError::PortBusy`] if the
/// port cannot be opened, otherwise any handshake error.
pub fn splitflap_context(
    port: &SerialPortSpec,
    policy: RetryPolicy,
) -> Result<Session<SerialTransport>, SplitflapError> {
    info!(path = %port.path, baud = port.baud_rate, "opening splitflap session");
    let transport = SerialTransport::open(port)?;
    Session::establish(transport, policy)
}

/// Scoped form of [`splitflap_context`]: the port is released when `f`
/// returns, whether it succeeded or not.
pub fn with_session<R>(
    port: &SerialPortSpec,
    policy: RetryPolicy,
    f: impl FnOnce(&Session<SerialTransport>) -> Result<R, SplitflapError>,
) -> Result<R, SplitflapError> {
    let transport = SerialTransport::open(port)?;
    Session::scoped(transport, policy, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::MockTransport;
    use splitflap_core::{decode_frame, encode_frame, MessageType, Response};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    /// Mock device with 4 modules and alphabet " abc" that acks every text.
    /// Returns the mock and a counter of writes after the handshake.
    fn handshaken_mock() -> (MockTransport, Arc<StdMutex<usize>>) {
        let last: Arc<StdMutex<Option<(u8, u8)>>> = Arc::new(StdMutex::new(None));
        let writes = Arc::new(StdMutex::new(0usize));
        let mut mock = MockTransport::new();

        let last_w = Arc::clone(&last);
        let writes_w = Arc::clone(&writes);
        mock.expect_write().returning(move |bytes| {
            let frame = decode_frame(bytes).unwrap();
            *last_w.lock().unwrap() = Some((frame.frame_type, frame.seq));
            *writes_w.lock().unwrap() += 1;
            Ok(())
        });

        let last_r = Arc::clone(&last);
        mock.expect_read().returning(move |_, timeout| {
            let Some((ty, seq)) = last_r.lock().unwrap().take() else {
                return Err(TransportError::Timeout(timeout));
            };
            let resp = match MessageType::try_from(ty).unwrap() {
                MessageType::QueryModuleCount => Response::ModuleCount(4),
                MessageType::QueryAlphabet => Response::Alphabet(" abc".chars().collect()),
                _ => Response::TextAck,
            };
            Ok(encode_frame(&resp.to_frame(seq)).unwrap())
        });
        mock.expect_close().times(1).returning(|| Ok(()));
        (mock, writes)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            response_timeout: Duration::from_millis(20),
            max_attempts: 2,
        }
    }

    #[test]
    fn test_establish_caches_capabilities() {
        // Arrange
        let (mock, _) = handshaken_mock();

        // Act
        let session = Session::establish(mock, policy()).unwrap();

        // Assert
        assert_eq!(session.get_num_modules().unwrap(), 4);
        assert_eq!(session.get_alphabet().unwrap().to_string(), " abc");
    }

    #[test]
    fn test_invalid_text_issues_zero_writes() {
        // Arrange
        let (mock, writes) = handshaken_mock();
        let session = Session::establish(mock, policy()).unwrap();
        let after_handshake = *writes.lock().unwrap();

        // Act
        let too_short = session.set_text("ab");
        let unknown_char = session.set_text("abcz");

        // Assert
        assert!(matches!(
            too_short,
            Err(SplitflapError::InvalidText(TextError::LengthMismatch { .. }))
        ));
        assert!(matches!(
            unknown_char,
            Err(SplitflapError::InvalidText(TextError::UnsupportedCharacter { ch: 'z', position: 3 }))
        ));
        assert_eq!(*writes.lock().unwrap(), after_handshake);
        assert_eq!(session.last_text(), None);
    }

    #[test]
    fn test_valid_text_is_recorded_after_ack() {
        let (mock, _) = handshaken_mock();
        let session = Session::establish(mock, policy()).unwrap();

        session.set_text("cab ").unwrap();

        assert_eq!(session.last_text().as_deref(), Some("cab "));
    }

    #[test]
    fn test_handshake_failure_closes_transport() {
        // Arrange: a device that never answers
        let mut mock = MockTransport::new();
        mock.expect_write().returning(|_| Ok(()));
        mock.expect_read().returning(|_, timeout| Err(TransportError::Timeout(timeout)));
        mock.expect_close().times(1).returning(|| Ok(()));

        // Act
        let result = Session::establish(mock, policy());

        // Assert – close() expectation is checked when the mock drops
        assert!(matches!(
            result,
            Err(SplitflapError::DeviceUnresponsive { attempts: 2 })
        ));
    }

    #[test]
    fn test_explicit_close_then_drop_closes_once() {
        let (mock, _) = handshaken_mock();
        let session = Session::establish(mock, policy()).unwrap();

        // times(1) on close() fails the test if Drop closes again.
        session.close().unwrap();
    }
}
