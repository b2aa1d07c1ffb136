//! Splitflap clock entry point.
//!
//! Shows the current time on a splitflap display and updates it whenever
//! the minute changes, until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- TOML file + SPLITFLAP_* env overrides
//!  └─ port: config or ask_for_serial_port()
//!  └─ splitflap_context()       -- open port, handshake
//!  └─ run_clock()               -- interval task, stopped by Ctrl-C
//!  └─ Session::close()
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use splitflap_host::application::clock::{run_clock, ClockSettings};
use splitflap_host::infrastructure::storage::config::{self, AppConfig};
use splitflap_host::{ask_for_serial_port, splitflap_context, RetryPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg: AppConfig = config::load_config().context("failed to load configuration")?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.log_level)),
        )
        .init();

    info!("splitflap clock starting");

    let port = match cfg.serial.port_spec() {
        Some(port) => port,
        None => tokio::task::spawn_blocking(ask_for_serial_port)
            .await?
            .context("no serial port selected")?
            .with_baud_rate(cfg.serial.baud_rate),
    };

    let policy = RetryPolicy::from(&cfg.protocol);
    let open_port = port.clone();
    let session = tokio::task::spawn_blocking(move || splitflap_context(&open_port, policy))
        .await?
        .with_context(|| format!("failed to open splitflap on {}", port.path))?;
    let session = Arc::new(session);

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(port = %port.path, "splitflap clock ready.  Press Ctrl-C to exit.");
    let settings = ClockSettings::from(&cfg.clock);
    let outcome = run_clock(Arc::clone(&session), settings, shutdown_rx).await;

    // The clock task has finished, so this is the last reference.
    match Arc::try_unwrap(session) {
        Ok(session) => tokio::task::spawn_blocking(move || session.close())
            .await?
            .context("failed to close serial port")?,
        Err(_) => info!("session still shared; port is released on drop"),
    }

    let updates = outcome.context("clock stopped with an error")?;
    info!(updates, "splitflap clock stopped");
    Ok(())
}
