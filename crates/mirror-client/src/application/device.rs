//! Identity and configuration of a running device.
//!
//! A [`DeviceId`] comes from the registration file a device process writes
//! when it starts; it says where the RPC endpoint is.  A
//! [`DeviceConfiguration`] comes from the device's own configuration files
//! and describes its display.  Reading those files is an infrastructure
//! concern, so the session only sees the [`DeviceConfigurationSource`] trait.

use std::path::PathBuf;

use mirror_core::domain::display::{DisplayMode, DisplayModeValue, PostureRange, Rect, Rotation, Size};
use thiserror::Error;

/// Host the device processes listen on.
pub const DEFAULT_HOST: &str = "localhost";

/// Command-line flag of a device process whose window is hidden because it
/// is embedded in another tool.
const EMBEDDED_FLAG: &str = "-qt-hide-window";

/// Errors produced while resolving a device configuration.
#[derive(Debug, Error)]
pub enum DeviceConfigError {
    /// A configuration file could not be read.
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required key is absent.
    #[error("{file} does not define {key}")]
    MissingKey { file: PathBuf, key: String },

    /// A key has a value that cannot be interpreted.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Address and credentials of a device's RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Opaque token sent as `authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
}

impl Endpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Identity of one running device process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    pub avd_id: String,
    pub avd_name: String,
    pub avd_folder: PathBuf,
    pub serial_port: u16,
    pub adb_port: u16,
    pub command_line: Vec<String>,
    pub rpc_port: u16,
    pub rpc_token: Option<String>,
    pub registration_file: PathBuf,
}

impl DeviceId {
    /// Serial number the device is known by, e.g. `emulator-5554`.
    pub fn serial_number(&self) -> String {
        format!("emulator-{}", self.serial_port)
    }

    /// Human-readable name: the AVD name with underscores as spaces.
    pub fn display_name(&self) -> String {
        self.avd_name.replace('_', " ")
    }

    /// `true` when the device process runs without its own window.
    pub fn is_embedded(&self) -> bool {
        self.command_line.iter().any(|arg| arg == EMBEDDED_FLAG)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: DEFAULT_HOST.to_string(),
            port: self.rpc_port,
            bearer_token: self.rpc_token.clone(),
        }
    }
}

/// Display-related configuration of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfiguration {
    pub avd_name: String,
    pub avd_folder: PathBuf,
    pub display_size: Size,
    pub density: u32,
    /// Folder with the device frame artwork, `None` when no frame is shown.
    pub skin_folder: Option<PathBuf>,
    pub initial_rotation: Rotation,
    pub api_level: u32,
    /// Resizable display modes; empty for a fixed display.
    pub display_modes: Vec<DisplayMode>,
    pub postures: Vec<PostureRange>,
    /// Visible part of the display while folded.
    pub folded_display: Option<Rect>,
    pub has_audio_output: bool,
    pub has_orientation_sensors: bool,
}

impl DeviceConfiguration {
    pub fn is_resizable(&self) -> bool {
        !self.display_modes.is_empty()
    }

    pub fn is_foldable(&self) -> bool {
        !self.postures.is_empty() || self.folded_display.is_some()
    }

    pub fn display_mode(&self, id: DisplayModeValue) -> Option<&DisplayMode> {
        self.display_modes.iter().find(|m| m.id == id)
    }

    /// Largest display size the device can switch to.
    pub fn max_display_size(&self) -> Size {
        self.display_modes
            .iter()
            .map(DisplayMode::size)
            .chain(std::iter::once(self.display_size))
            .max_by_key(Size::area)
            .unwrap_or(self.display_size)
    }

    /// Ceiling for inbound messages: one full-resolution RGB888 frame plus
    /// `margin` bytes of envelope.
    pub fn max_inbound_message_size(&self, margin: usize) -> usize {
        let size = self.max_display_size();
        size.width as usize * size.height as usize * 3 + margin
    }
}

/// Resolves the configuration of a device.  Implementations may block on
/// file I/O; callers run them on the blocking pool.
pub trait DeviceConfigurationSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DeviceConfigError`] if the configuration is missing or malformed.
    fn load(&self, device: &DeviceId) -> Result<DeviceConfiguration, DeviceConfigError>;

    /// Loads the device frame artwork.  `None` when the device has no skin or
    /// it cannot be read.
    fn load_skin(&self, configuration: &DeviceConfiguration) -> Option<crate::application::skin::SkinDefinition>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn device_id() -> DeviceId {
        DeviceId {
            avd_id: "Pixel_7_API_34".to_string(),
            avd_name: "Pixel_7_API_34".to_string(),
            avd_folder: PathBuf::from("/avd/Pixel_7_API_34.avd"),
            serial_port: 5554,
            adb_port: 5555,
            command_line: vec!["emulator".to_string(), "-avd".to_string(), "Pixel_7_API_34".to_string()],
            rpc_port: 8554,
            rpc_token: Some("secret".to_string()),
            registration_file: PathBuf::from("/run/avd/running/pid_100.ini"),
        }
    }

    pub fn configuration(width: u32, height: u32) -> DeviceConfiguration {
        DeviceConfiguration {
            avd_name: "Pixel_7_API_34".to_string(),
            avd_folder: PathBuf::from("/avd/Pixel_7_API_34.avd"),
            display_size: Size::new(width, height),
            density: 420,
            skin_folder: None,
            initial_rotation: Rotation::Deg0,
            api_level: 34,
            display_modes: Vec::new(),
            postures: Vec::new(),
            folded_display: None,
            has_audio_output: true,
            has_orientation_sensors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_device_id_serial_number_uses_console_port() {
        assert_eq!(device_id().serial_number(), "emulator-5554");
        assert_eq!(device_id().display_name(), "Pixel 7 API 34");
    }

    #[test]
    fn test_device_id_embedded_flag_detected_in_command_line() {
        let mut id = device_id();
        assert!(!id.is_embedded());
        id.command_line.push(EMBEDDED_FLAG.to_string());
        assert!(id.is_embedded());
    }

    #[test]
    fn test_endpoint_carries_token_and_port() {
        let endpoint = device_id().endpoint();
        assert_eq!(endpoint.address(), "localhost:8554");
        assert_eq!(endpoint.bearer_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_max_inbound_message_size_covers_largest_mode() {
        // Arrange
        let mut config = configuration(100, 200);
        assert_eq!(config.max_inbound_message_size(100), 100 * 200 * 3 + 100);

        // Act
        config.display_modes.push(DisplayMode::parse("tablet-2-300-200-240").unwrap());

        // Assert
        assert_eq!(config.max_inbound_message_size(100), 300 * 200 * 3 + 100);
        assert!(config.is_resizable());
        assert!(config.display_mode(DisplayModeValue::Tablet).is_some());
    }
}
