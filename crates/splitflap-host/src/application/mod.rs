//! Application layer of the splitflap driver.
//!
//! - **`engine`** – Turns one logical operation into a frame exchange with
//!   the device, with sequence correlation and bounded retries.
//!
//! - **`session`** – The handshaken connection callers hold. Caches device
//!   capabilities, validates text and guarantees the port is released.
//!
//! - **`clock`** – Cancellable task that keeps the current time on the
//!   display.

pub mod clock;
pub mod engine;
pub mod session;
