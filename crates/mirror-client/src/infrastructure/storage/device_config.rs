//! Device configuration read from the AVD folder.
//!
//! Two key-value files describe a device:
//!
//! - `config.ini`, written when the device was created;
//! - `hardware-qemu.ini`, written by the running device process.  It
//!   reflects what the device actually uses and wins over `config.ini`.
//!
//! ```text
//! hw.lcd.width=1080            hw.resizable.configs=phone-0-1080-2400-420, ...
//! hw.lcd.height=2400           hw.sensor.hinge_angles_posture_definitions=0-30, 30-150, 150-180
//! hw.lcd.density=420           hw.sensor.posture_list=1, 2, 3
//! hw.initialOrientation=portrait
//! skin.path=/sdk/skins/pixel_7 hw.displayRegion.0.1.width=884 (and height, xOffset, yOffset)
//! ```

use std::path::{Path, PathBuf};

use mirror_core::domain::display::{parse_display_modes, parse_posture_ranges, Rect, Rotation, Size};
use tracing::{debug, warn};

use crate::application::device::{DeviceConfigError, DeviceConfiguration, DeviceConfigurationSource, DeviceId};
use crate::application::skin::SkinDefinition;
use crate::infrastructure::storage::kvfile::{read_key_value_file, KeyValueError, KeyValues};
use crate::infrastructure::storage::skin::load_skin;

pub const CONFIG_FILE: &str = "config.ini";
pub const HARDWARE_FILE: &str = "hardware-qemu.ini";

/// Skin path meaning "no device frame".
const NO_SKIN: &str = "_no_skin";
const DEFAULT_DENSITY: u32 = 160;

fn io_error(e: KeyValueError) -> DeviceConfigError {
    match e {
        KeyValueError::Io { path, source } => DeviceConfigError::Io { path, source },
    }
}

fn flag(values: &KeyValues, key: &str, default: bool) -> bool {
    match values.get(key).map(str::to_ascii_lowercase).as_deref() {
        Some("yes" | "true" | "1") => true,
        Some("no" | "false" | "0") => false,
        _ => default,
    }
}

/// Reads and merges the configuration files of the AVD in `avd_folder`.
/// Relative skin paths are resolved against `sdk_root` when given, and
/// against the AVD folder otherwise.
///
/// # Errors
///
/// Returns [`DeviceConfigError`] if `config.ini` cannot be read, the display
/// size is missing, or a display mode or posture list is malformed.
pub fn read_device_configuration(avd_folder: &Path, sdk_root: Option<&Path>) -> Result<DeviceConfiguration, DeviceConfigError> {
    let config_file = avd_folder.join(CONFIG_FILE);
    let mut values = read_key_value_file(&config_file).map_err(io_error)?;
    match read_key_value_file(&avd_folder.join(HARDWARE_FILE)) {
        Ok(hardware) => values.merge(&hardware),
        Err(e) => debug!("no hardware configuration: {e}"),
    }
    parse_configuration(&values, avd_folder, sdk_root, &config_file)
}

fn parse_configuration(
    values: &KeyValues,
    avd_folder: &Path,
    sdk_root: Option<&Path>,
    config_file: &Path,
) -> Result<DeviceConfiguration, DeviceConfigError> {
    let dimension = |key: &str| -> Result<u32, DeviceConfigError> {
        let value = values.get(key).ok_or_else(|| DeviceConfigError::MissingKey {
            file: config_file.to_path_buf(),
            key: key.to_string(),
        })?;
        value
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| DeviceConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
    };
    let invalid = |key: &str, value: &str| DeviceConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let display_size = Size::new(dimension("hw.lcd.width")?, dimension("hw.lcd.height")?);

    let display_modes = match values.get("hw.resizable.configs") {
        Some(list) => parse_display_modes(list).map_err(|_| invalid("hw.resizable.configs", list))?,
        None => Vec::new(),
    };

    let postures = match (
        values.get("hw.sensor.hinge_angles_posture_definitions"),
        values.get("hw.sensor.posture_list"),
    ) {
        (Some(ranges), Some(ids)) => {
            parse_posture_ranges(ranges, ids).map_err(|_| invalid("hw.sensor.posture_list", ids))?
        }
        _ => Vec::new(),
    };

    let folded_display = folded_region(values);

    Ok(DeviceConfiguration {
        avd_name: values
            .get("avd.ini.displayname")
            .map(str::to_string)
            .unwrap_or_else(|| avd_name_from_folder(avd_folder)),
        avd_folder: avd_folder.to_path_buf(),
        display_size,
        density: values.get_parsed("hw.lcd.density").unwrap_or(DEFAULT_DENSITY),
        skin_folder: skin_folder(values, avd_folder, sdk_root),
        initial_rotation: values
            .get("hw.initialOrientation")
            .map_or(Rotation::Deg0, Rotation::from_orientation_name),
        api_level: api_level(values),
        display_modes,
        postures,
        folded_display,
        has_audio_output: flag(values, "hw.audioOutput", true),
        has_orientation_sensors: flag(values, "hw.sensors.orientation", true),
    })
}

fn avd_name_from_folder(avd_folder: &Path) -> String {
    avd_folder
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Skin folder, `None` when the device frame is disabled or absent.
fn skin_folder(values: &KeyValues, avd_folder: &Path, sdk_root: Option<&Path>) -> Option<PathBuf> {
    if !flag(values, "showDeviceFrame", true) {
        return None;
    }
    let path = values.get("skin.path").filter(|p| !p.is_empty() && *p != NO_SKIN)?;
    let path = PathBuf::from(path);
    if path.is_absolute() {
        return Some(path);
    }
    Some(sdk_root.unwrap_or(avd_folder).join(path))
}

/// API level from `image.androidVersion.api`, else from `target=android-N`.
fn api_level(values: &KeyValues) -> u32 {
    values
        .get_parsed("image.androidVersion.api")
        .or_else(|| {
            values
                .get("target")
                .and_then(|target| target.rsplit('-').next())
                .and_then(|level| level.parse().ok())
        })
        .unwrap_or(0)
}

/// Region of the primary display shown while the device is folded.
fn folded_region(values: &KeyValues) -> Option<Rect> {
    let key = |field: &str| format!("hw.displayRegion.0.1.{field}");
    let width: u32 = values.get_parsed(&key("width"))?;
    let height: u32 = values.get_parsed(&key("height"))?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Rect::new(
        values.get_parsed(&key("xOffset")).unwrap_or(0),
        values.get_parsed(&key("yOffset")).unwrap_or(0),
        width,
        height,
    ))
}

/// [`DeviceConfigurationSource`] reading the AVD folder named in the
/// registration file.
#[derive(Debug, Clone, Default)]
pub struct FileConfigurationSource {
    sdk_root: Option<PathBuf>,
}

impl FileConfigurationSource {
    pub fn new(sdk_root: Option<PathBuf>) -> Self {
        Self { sdk_root }
    }
}

impl DeviceConfigurationSource for FileConfigurationSource {
    fn load(&self, device: &DeviceId) -> Result<DeviceConfiguration, DeviceConfigError> {
        read_device_configuration(&device.avd_folder, self.sdk_root.as_deref())
    }

    fn load_skin(&self, configuration: &DeviceConfiguration) -> Option<SkinDefinition> {
        let folder = configuration.skin_folder.as_ref()?;
        match load_skin(folder) {
            Ok(skin) => Some(skin),
            Err(e) => {
                warn!("{}: device frame unavailable: {e}", configuration.avd_name);
                None
            }
        }
    }
}
