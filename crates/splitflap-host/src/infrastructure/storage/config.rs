//! TOML configuration for the splitflap clock.
//!
//! Read from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Splitflap\config.toml`
//! - Linux:    `~/.config/splitflap/config.toml`
//! - macOS:    `~/Library/Application Support/Splitflap/config.toml`
//!
//! `SPLITFLAP_CONFIG` replaces that path and `SPLITFLAP_PORT` replaces the
//! configured serial port. Example:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 230400
//!
//! [protocol]
//! response_timeout_ms = 2000
//! max_attempts = 3
//!
//! [clock]
//! format = "%H%M"
//! tick_ms = 1000
//!
//! [logging]
//! log_level = "info"
//! ```
//!
//! Every field has a default, so a missing file, a missing section and a
//! missing key are all fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::clock::ClockSettings;
use crate::application::engine::RetryPolicy;
use crate::infrastructure::transport::{SerialPortSpec, DEFAULT_BAUD_RATE};

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SPLITFLAP_CONFIG";
/// Overrides `[serial] port`.
pub const PORT_ENV: &str = "SPLITFLAP_PORT";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    /// Port path; when absent the port is detected or asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// How long to wait for each reply, in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Attempts per command, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockConfig {
    /// `chrono` format string for the displayed time.
    #[serde(default = "default_clock_format")]
    pub format: String,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_response_timeout_ms() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_clock_format() -> String {
    "%H%M".to_string()
}
fn default_tick_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            format: default_clock_format(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Conversions into runtime settings ─────────────────────────────────────────

impl SerialConfig {
    /// The configured port, if any, at the configured baud rate.
    pub fn port_spec(&self) -> Option<SerialPortSpec> {
        self.port
            .as_ref()
            .map(|path| SerialPortSpec::new(path.clone()).with_baud_rate(self.baud_rate))
    }
}

impl From<&ProtocolConfig> for RetryPolicy {
    fn from(cfg: &ProtocolConfig) -> Self {
        RetryPolicy {
            response_timeout: Duration::from_millis(cfg.response_timeout_ms),
            max_attempts: cfg.max_attempts.max(1),
        }
    }
}

impl From<&ClockConfig> for ClockSettings {
    fn from(cfg: &ClockConfig) -> Self {
        ClockSettings {
            format: cfg.format.clone(),
            tick: Duration::from_millis(cfg.tick_ms.max(1)),
        }
    }
}

impl AppConfig {
    /// Applies `SPLITFLAP_PORT` if set.
    pub fn with_env_overrides(self) -> Self {
        self.with_port_override(std::env::var(PORT_ENV).ok())
    }

    fn with_port_override(mut self, port: Option<String>) -> Self {
        if let Some(port) = port.filter(|p| !p.trim().is_empty()) {
            self.serial.port = Some(port);
        }
        self
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the config file path, honouring `SPLITFLAP_CONFIG`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if no override is set and the
/// base directory cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default location, with env overrides applied.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    Ok(load_config_from(&config_file_path()?)?.with_env_overrides())
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Resolves the platform config base directory plus the `Splitflap` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Splitflap"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("splitflap"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Splitflap")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
