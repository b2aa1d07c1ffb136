//! Clock task: keeps the current time on the display.
//!
//! The time is formatted with a `chrono` format string (default `%H%M`),
//! fitted to the module count and pushed whenever it differs from what was
//! last sent. The task runs on a `tokio` interval and stops when the
//! shutdown signal flips to `true`. Driver calls block, so each one runs on
//! the blocking pool; a command is never abandoned halfway.

use std::sync::Arc;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use splitflap_core::BLANK;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::application::session::Session;
use crate::error::SplitflapError;
use crate::infrastructure::transport::Transport;

/// Something that can show text, one character per module.
pub trait TextDisplay: Send + Sync + 'static {
    fn num_modules(&self) -> Result<usize, SplitflapError>;
    fn show(&self, text: &str) -> Result<(), SplitflapError>;
}

impl<T: Transport + 'static> TextDisplay for Session<T> {
    fn num_modules(&self) -> Result<usize, SplitflapError> {
        self.get_num_modules()
    }

    fn show(&self, text: &str) -> Result<(), SplitflapError> {
        self.set_text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSettings {
    /// `chrono` strftime-style format.
    pub format: String,
    /// How often the time is checked.
    pub tick: Duration,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            format: "%H%M".to_string(),
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("invalid clock format {0:?}")]
    InvalidFormat(String),

    /// The display failed in a way a later tick cannot fix.
    #[error("display failed: {0}")]
    Display(#[source] SplitflapError),

    #[error("blocking display task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Pads with blanks or truncates so `text` has exactly `modules` characters.
pub fn fit_to_modules(text: &str, modules: usize) -> String {
    text.chars()
        .chain(std::iter::repeat(BLANK))
        .take(modules)
        .collect()
}

/// Runs the clock against the local time until `shutdown` becomes `true`.
///
/// Returns the number of texts the display acknowledged.
pub async fn run_clock<D: TextDisplay>(
    display: Arc<D>,
    settings: ClockSettings,
    shutdown: watch::Receiver<bool>,
) -> Result<u64, ClockError> {
    run_clock_with(display, settings, shutdown, Local::now).await
}

/// [`run_clock`] with an injectable time source.
pub async fn run_clock_with<D, F>(
    display: Arc<D>,
    settings: ClockSettings,
    mut shutdown: watch::Receiver<bool>,
    mut now: F,
) -> Result<u64, ClockError>
where
    D: TextDisplay,
    F: FnMut() -> DateTime<Local>,
{
    if StrftimeItems::new(&settings.format).any(|item| matches!(item, Item::Error)) {
        return Err(ClockError::InvalidFormat(settings.format));
    }
    let modules = display.num_modules().map_err(ClockError::Display)?;
    let mut interval = tokio::time::interval(settings.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut shown: Option<String> = None;
    let mut updates = 0u64;
    info!(format = %settings.format, modules, "clock started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let text = fit_to_modules(&now().format(&settings.format).to_string(), modules);
        if shown.as_deref() == Some(text.as_str()) {
            continue;
        }

        let target = Arc::clone(&display);
        let pushed = text.clone();
        match tokio::task::spawn_blocking(move || target.show(&pushed)).await? {
            Ok(()) => {
                debug!(%text, "clock updated");
                shown = Some(text);
                updates += 1;
            }
            Err(e @ (SplitflapError::Transport(_) | SplitflapError::NotReady)) => {
                return Err(ClockError::Display(e));
            }
            Err(e) => warn!(error = %e, %text, "clock update failed, retrying next tick"),
        }
    }

    info!(updates, "clock stopped");
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDisplay {
        shown: Mutex<Vec<String>>,
        failures_left: Mutex<u32>,
    }

    impl TextDisplay for RecordingDisplay {
        fn num_modules(&self) -> Result<usize, SplitflapError> {
            Ok(6)
        }

        fn show(&self, text: &str) -> Result<(), SplitflapError> {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SplitflapError::DeviceUnresponsive { attempts: 3 });
            }
            self.shown.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn fixed_time(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn fast() -> ClockSettings {
        ClockSettings {
            tick: Duration::from_millis(5),
            ..ClockSettings::default()
        }
    }

    #[test]
    fn test_fit_to_modules_pads_and_truncates() {
        assert_eq!(fit_to_modules("1234", 6), "1234  ");
        assert_eq!(fit_to_modules("123456", 4), "1234");
        assert_eq!(fit_to_modules("", 2), "  ");
    }

    #[tokio::test]
    async fn test_clock_pushes_unchanged_time_once() {
        // Arrange
        let display = Arc::new(RecordingDisplay::default());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_clock_with(
            Arc::clone(&display),
            fast(),
            rx,
            || fixed_time(12, 34),
        ));

        // Act
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let updates = task.await.unwrap().unwrap();

        // Assert
        assert_eq!(updates, 1);
        assert_eq!(*display.shown.lock().unwrap(), vec!["1234  ".to_string()]);
    }

    #[tokio::test]
    async fn test_clock_pushes_each_new_minute() {
        let display = Arc::new(RecordingDisplay::default());
        let (tx, rx) = watch::channel(false);
        let mut minute = 0;
        let task = tokio::spawn(run_clock_with(Arc::clone(&display), fast(), rx, move || {
            minute = (minute + 1).min(3);
            fixed_time(9, minute)
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let shown = display.shown.lock().unwrap().clone();
        assert_eq!(shown, vec!["0901  ", "0902  ", "0903  "]);
    }

    #[tokio::test]
    async fn test_clock_retries_after_unresponsive_device() {
        let display = Arc::new(RecordingDisplay {
            failures_left: Mutex::new(2),
            ..RecordingDisplay::default()
        });
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_clock_with(
            Arc::clone(&display),
            fast(),
            rx,
            || fixed_time(7, 5),
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        let updates = task.await.unwrap().unwrap();

        assert_eq!(updates, 1);
        assert_eq!(*display.shown.lock().unwrap(), vec!["0705  ".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_format_is_rejected_before_any_update() {
        let display = Arc::new(RecordingDisplay::default());
        let (_tx, rx) = watch::channel(false);
        let settings = ClockSettings {
            format: "%Q".to_string(),
            ..fast()
        };

        let result = run_clock_with(Arc::clone(&display), settings, rx, || fixed_time(1, 2)).await;

        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, ClockError::InvalidFormat(_)));
        assert!(display.shown.lock().unwrap().is_empty());
    }

    /// Knows its size but lost its capabilities before the first update.
    struct ForgetfulDisplay;

    impl TextDisplay for ForgetfulDisplay {
        fn num_modules(&self) -> Result<usize, SplitflapError> {
            Ok(4)
        }

        fn show(&self, _: &str) -> Result<(), SplitflapError> {
            Err(SplitflapError::NotReady)
        }
    }

    #[tokio::test]
    async fn test_not_ready_display_stops_clock() {
        let (_tx, rx) = watch::channel(false);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_clock_with(Arc::new(ForgetfulDisplay), fast(), rx, || fixed_time(3, 4)),
        )
        .await
        .expect("clock must stop on its own");

        assert!(matches!(
            result,
            Err(ClockError::Display(SplitflapError::NotReady))
        ));
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_clock() {
        let display = Arc::new(RecordingDisplay::default());
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_clock_with(display, fast(), rx, || fixed_time(0, 0)),
        )
        .await;

        assert!(result.is_ok(), "clock must stop when the sender is gone");
    }
}
