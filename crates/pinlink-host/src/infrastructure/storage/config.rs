//! TOML-based configuration for the host session and console runner.
//!
//! The default location is the platform config directory:
//! - Windows:  `%APPDATA%\pinlink\config.toml`
//! - Linux:    `~/.config/pinlink/config.toml`
//! - macOS:    `~/Library/Application Support/pinlink/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [transport]
//! kind = "tcp-dial"
//! address = "192.168.4.1:4545"
//!
//! [connection]
//! handshake_timeout_ms = 3000
//! keepalive_interval_ms = 1000
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so a partial file
//! (or none at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the byte stream to the board is obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Dial `address` (`host:port`).
    TcpDial,
    /// Bind `address` and accept one board.
    TcpListen,
    /// Open the serial port named by `address` at `baud`.
    Serial,
}

/// Transport selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_kind")]
    pub kind: TransportKind,
    /// Socket address or serial device path, depending on `kind`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Serial line rate; ignored by TCP transports.
    #[serde(default = "default_baud")]
    pub baud: u32,
}

/// Timing and robustness knobs for the connection state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// How long to wait for the handshake after the stream opens.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Inbound silence tolerated once verified; `0` disables the watchdog.
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
    /// Ping interval while verified; `0` disables keepalive.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Pause after verification before `wait_for_connect` returns.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Consecutive malformed frames tolerated before the link is declared lost.
    #[serde(default = "default_max_resync_failures")]
    pub max_resync_failures: u32,
    /// How long a partially received frame may wait for its remaining bytes
    /// before it is dropped as malformed; `0` waits indefinitely.
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

/// Logging settings for the console runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_kind() -> TransportKind {
    TransportKind::TcpDial
}
fn default_address() -> String {
    "127.0.0.1:4545".to_string()
}
fn default_baud() -> u32 {
    115_200
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_silence_timeout_ms() -> u64 {
    5_000
}
fn default_keepalive_interval_ms() -> u64 {
    1_000
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_max_resync_failures() -> u32 {
    pinlink_core::protocol::stream::DEFAULT_MAX_RESYNC_FAILURES
}
fn default_frame_timeout_ms() -> u64 {
    250
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            address: default_address(),
            baud: default_baud(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            silence_timeout_ms: default_silence_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            max_resync_failures: default_max_resync_failures(),
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ConnectionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `None` when the silence watchdog is disabled.
    pub fn silence_timeout(&self) -> Option<Duration> {
        (self.silence_timeout_ms > 0).then(|| Duration::from_millis(self.silence_timeout_ms))
    }

    /// `None` when keepalive is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// `None` when partial frames may wait indefinitely.
    pub fn frame_timeout(&self) -> Option<Duration> {
        (self.frame_timeout_ms > 0).then(|| Duration::from_millis(self.frame_timeout_ms))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads a [`HostConfig`] from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_from(path: &Path) -> Result<HostConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Loads a [`HostConfig`] from `path`, returning the defaults if the file does
/// not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_or_default(path: &Path) -> Result<HostConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_to(path: &Path, config: &HostConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("pinlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("pinlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("pinlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
