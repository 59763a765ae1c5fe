//! TOML settings of the mirroring client.
//!
//! The file lives in the platform config directory unless `--config` points
//! elsewhere:
//! - Windows:  `%APPDATA%\DeviceMirror\config.toml`
//! - Linux:    `~/.config/device-mirror/config.toml`
//! - macOS:    `~/Library/Application Support/DeviceMirror/config.toml`
//!
//! # What is TOML? (for beginners)
//!
//! TOML is an INI-like configuration format with typed values.  The client
//! reads four sections:
//!
//! ```toml
//! [client]
//! log_level = "info"
//! sdk_root = "/opt/android-sdk"
//!
//! [session]
//! keep_alive_interval_secs = 120
//! connected_deadline_ms = 3000
//!
//! [trace]
//! grpc_calls = true
//!
//! [display]
//! show_device_frame = false
//! ```
//!
//! Every field has a default (`#[serde(default = "...")]`), so a missing file,
//! a missing section and a missing key all fall back to the built-in values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::display_view::DisplayViewSettings;
use crate::application::session::{SessionSettings, TraceSettings};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory scanned for running devices.  Platform default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_dir: Option<PathBuf>,
    /// SDK location used to resolve relative skin paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_root: Option<PathBuf>,
}

/// Liveness timing of a device session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "default_connected_deadline_ms")]
    pub connected_deadline_ms: u64,
    #[serde(default = "default_connecting_deadline_ms")]
    pub connecting_deadline_ms: u64,
    /// Bytes allowed on top of one full-size frame per inbound message.
    #[serde(default = "default_inbound_size_margin")]
    pub inbound_size_margin: usize,
}

/// Which RPC traffic is logged.  All off by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceConfig {
    #[serde(default)]
    pub grpc_calls: bool,
    /// Also log mouse, touch and wheel input.
    #[serde(default)]
    pub high_volume_grpc_calls: bool,
    #[serde(default)]
    pub screenshots: bool,
}

/// Display view behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub show_device_frame: bool,
    #[serde(default = "default_recycled_buffer_ttl_ms")]
    pub recycled_buffer_ttl_ms: u64,
    /// Period of the frame statistics log line; `0` disables it.
    #[serde(default)]
    pub stats_interval_secs: u64,
    #[serde(default = "default_zoom_reset_tolerance")]
    pub zoom_reset_tolerance: f64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_keep_alive_interval_secs() -> u64 {
    120
}
fn default_connected_deadline_ms() -> u64 {
    3000
}
fn default_connecting_deadline_ms() -> u64 {
    15_000
}
fn default_inbound_size_margin() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_recycled_buffer_ttl_ms() -> u64 {
    2000
}
fn default_zoom_reset_tolerance() -> f64 {
    0.01
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            registration_dir: None,
            sdk_root: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            connected_deadline_ms: default_connected_deadline_ms(),
            connecting_deadline_ms: default_connecting_deadline_ms(),
            inbound_size_margin: default_inbound_size_margin(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_device_frame: default_true(),
            recycled_buffer_ttl_ms: default_recycled_buffer_ttl_ms(),
            stats_interval_secs: 0,
            zoom_reset_tolerance: default_zoom_reset_tolerance(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            keep_alive_interval: Duration::from_secs(self.session.keep_alive_interval_secs),
            connected_deadline: Duration::from_millis(self.session.connected_deadline_ms),
            connecting_deadline: Duration::from_millis(self.session.connecting_deadline_ms),
            inbound_size_margin: self.session.inbound_size_margin,
            trace: TraceSettings {
                grpc_calls: self.trace.grpc_calls,
                high_volume_grpc_calls: self.trace.high_volume_grpc_calls,
                screenshots: self.trace.screenshots,
            },
        }
    }

    pub fn display_view_settings(&self) -> DisplayViewSettings {
        DisplayViewSettings {
            show_device_frame: self.display.show_device_frame,
            recycled_buffer_ttl: Duration::from_millis(self.display.recycled_buffer_ttl_ms),
            stats_interval: Duration::from_secs(self.display.stats_interval_secs),
            zoom_reset_tolerance: self.display.zoom_reset_tolerance,
            trace_screenshots: self.trace.screenshots,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default path of the config file.
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

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
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
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("DeviceMirror"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("DeviceMirror")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("device-mirror"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_app_config_default_matches_session_defaults() {
        // Arrange / Act
        let settings = AppConfig::default().session_settings();

        // Assert
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn test_app_config_default_matches_display_defaults() {
        let settings = AppConfig::default().display_view_settings();
        assert_eq!(settings, DisplayViewSettings::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults_for_missing_keys() {
        // Arrange
        let text = "[session]\nconnected_deadline_ms = 500\n\n[trace]\nscreenshots = true\n";

        // Act
        let cfg: AppConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.session.connected_deadline_ms, 500);
        assert_eq!(cfg.session.keep_alive_interval_secs, 120);
        assert_eq!(cfg.client.log_level, "info");
        assert!(cfg.display.show_device_frame);
        assert!(cfg.display_view_settings().trace_screenshots);
        assert_eq!(cfg.session_settings().connected_deadline, Duration::from_millis(500));
    }

    #[test]
    fn test_empty_file_yields_default_config() {
        let cfg: AppConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        // Arrange
        let path = std::env::temp_dir().join(format!("mirror_config_bad_{}.toml", Uuid::new_v4()));
        std::fs::write(&path, "[session\nkeep_alive_interval_secs = ").unwrap();

        // Act
        let result = load_config(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        // Cleanup
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let path = std::env::temp_dir().join(format!("mirror_config_missing_{}.toml", Uuid::new_v4()));
        assert_eq!(load_config(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trip_creates_directory() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("mirror_config_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.client.sdk_root = Some(PathBuf::from("/opt/sdk"));
        cfg.display.stats_interval_secs = 5;
        cfg.trace.grpc_calls = true;

        // Act
        save_config(&path, &cfg).unwrap();
        let restored = load_config(&path).unwrap();

        // Assert
        assert_eq!(restored, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
