//! Host-side cache of what is known about the connected device.
//!
//! Module count and alphabet never change for a device, so once the handshake
//! has learned them they are served from here without another round trip.
//! The last text is recorded after the device acknowledged it and is only a
//! record of what was asked for: flaps can slip, so it is never treated as
//! the physical display state.

use crate::domain::alphabet::{Alphabet, TextError};
use crate::protocol::messages::ModuleStatus;

/// Capabilities learned during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub num_modules: usize,
    pub alphabet: Alphabet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    capabilities: Option<Capabilities>,
    last_text: Option<Vec<char>>,
    module_statuses: Option<Vec<ModuleStatus>>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores module count and alphabet together.
    ///
    /// Any previously recorded text or statuses belong to the old
    /// capabilities and are dropped.
    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = Some(capabilities);
        self.last_text = None;
        self.module_statuses = None;
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn num_modules(&self) -> Option<usize> {
        self.capabilities.as_ref().map(|c| c.num_modules)
    }

    pub fn alphabet(&self) -> Option<&Alphabet> {
        self.capabilities.as_ref().map(|c| &c.alphabet)
    }

    pub fn is_ready(&self) -> bool {
        self.capabilities.is_some()
    }

    /// Validates `text` against the cached capabilities and returns the
    /// flap indices to send.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::CapabilitiesUnknown`] before the handshake, or
    /// the validation error from [`Alphabet::encode_text`].
    pub fn prepare_text(&self, text: &[char]) -> Result<Vec<u8>, TextError> {
        let caps = self
            .capabilities
            .as_ref()
            .ok_or(TextError::CapabilitiesUnknown)?;
        caps.alphabet.encode_text(text, caps.num_modules)
    }

    /// Records a text the device acknowledged.
    ///
    /// # Errors
    ///
    /// Rejects text that violates the cache invariants (length equals
    /// module count, every symbol in the alphabet); the cache is unchanged.
    pub fn record_text(&mut self, text: Vec<char>) -> Result<(), TextError> {
        self.prepare_text(&text)?;
        self.last_text = Some(text);
        Ok(())
    }

    pub fn last_text(&self) -> Option<&[char]> {
        self.last_text.as_deref()
    }

    pub fn record_statuses(&mut self, statuses: Vec<ModuleStatus>) {
        self.module_statuses = Some(statuses);
    }

    pub fn module_statuses(&self) -> Option<&[ModuleStatus]> {
        self.module_statuses.as_deref()
    }

    /// Forgets everything; used when the link is re-established.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }
}
