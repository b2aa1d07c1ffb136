//! Process-wide registry of open port paths.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::trace;

use crate::error::TransportError;

fn registry() -> &'static Mutex<HashSet<String>> {
    static CLAIMED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive hold on a port path; released on drop.
#[derive(Debug)]
pub struct PortClaim {
    path: String,
}

impl PortClaim {
    /// Claims `path` for the caller.
    ///
    /// # Errors
    ///
    /// [`TransportError::PortBusy`] if another claim on `path` is alive.
    pub fn acquire(path: &str) -> Result<Self, TransportError> {
        let mut claimed = registry().lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(path.to_string()) {
            return Err(TransportError::PortBusy(path.to_string()));
        }
        trace!(path, "claimed serial port");
        Ok(Self {
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reports whether any live claim holds `path`.
    pub fn is_claimed(path: &str) -> bool {
        registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
        trace!(path = %self.path, "released serial port");
    }
}
