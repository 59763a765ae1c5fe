//! In-memory [`DeviceConfigurationSource`] for tests.
//!
//! Hands out a fixed configuration (or a fixed error) without touching the
//! file system, and counts how often the session asked for it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use mirror_core::domain::display::{Rotation, Size};

use crate::application::device::{DeviceConfigError, DeviceConfiguration, DeviceConfigurationSource, DeviceId};
use crate::application::skin::SkinDefinition;

/// Configuration source with a scripted answer.
pub struct StaticConfigurationSource {
    configuration: Option<DeviceConfiguration>,
    skin: Option<SkinDefinition>,
    loads: AtomicUsize,
}

impl StaticConfigurationSource {
    pub fn new(configuration: DeviceConfiguration) -> Self {
        Self {
            configuration: Some(configuration),
            skin: None,
            loads: AtomicUsize::new(0),
        }
    }

    /// A source whose every load fails with a missing `hw.lcd.width`.
    pub fn failing() -> Self {
        Self {
            configuration: None,
            skin: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_skin(mut self, skin: SkinDefinition) -> Self {
        self.skin = Some(skin);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DeviceConfigurationSource for StaticConfigurationSource {
    fn load(&self, device: &DeviceId) -> Result<DeviceConfiguration, DeviceConfigError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.configuration.clone().ok_or_else(|| DeviceConfigError::MissingKey {
            file: device.avd_folder.join("config.ini"),
            key: "hw.lcd.width".to_string(),
        })
    }

    fn load_skin(&self, configuration: &DeviceConfiguration) -> Option<SkinDefinition> {
        configuration.skin_folder.as_ref().and(self.skin.clone())
    }
}

/// Identity of a device listening on `rpc_port`.
pub fn device_id(rpc_port: u16) -> DeviceId {
    DeviceId {
        avd_id: "Pixel_7_API_34".to_string(),
        avd_name: "Pixel_7_API_34".to_string(),
        avd_folder: PathBuf::from("/avd/Pixel_7_API_34.avd"),
        serial_port: 5554,
        adb_port: 5555,
        command_line: vec!["emulator".to_string(), "-avd".to_string(), "Pixel_7_API_34".to_string()],
        rpc_port,
        rpc_token: Some("secret".to_string()),
        registration_file: PathBuf::from("/run/avd/running/pid_100.ini"),
    }
}

/// A phone with a fixed `width`×`height` display and no device frame.
pub fn phone_configuration(width: u32, height: u32) -> DeviceConfiguration {
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
