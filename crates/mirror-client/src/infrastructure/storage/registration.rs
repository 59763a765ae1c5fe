//! Registration files written by running device processes.
//!
//! Every device process drops a `pid_<pid>.ini` file into a shared
//! directory while it runs:
//!
//! ```text
//! port.serial=5554
//! port.adb=5555
//! avd.name=Pixel_7_API_34
//! avd.dir=/home/me/.android/avd/Pixel_7_API_34.avd
//! avd.id=Pixel_7_API_34
//! cmdline="/sdk/emulator/emulator" "-avd" "Pixel_7_API_34" "-qt-hide-window"
//! grpc.port=8554
//! grpc.token=c2VjcmV0
//! ```

use std::path::{Path, PathBuf};

use mirror_core::domain::args::{decode_args, encode_args};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::device::DeviceId;
use crate::infrastructure::storage::kvfile::{read_key_value_file, write_key_value_file, KeyValueError, KeyValues};

/// Errors produced while reading a registration file.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    File(#[from] KeyValueError),

    #[error("{file} does not define {key}")]
    MissingKey { file: PathBuf, key: &'static str },

    #[error("{file}: invalid value {value:?} for {key}")]
    InvalidValue {
        file: PathBuf,
        key: &'static str,
        value: String,
    },

    #[error("unable to list {dir}: {source}")]
    Scan {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the device identity from the registration file at `path`.
///
/// # Errors
///
/// Returns [`RegistrationError`] when the file cannot be read, a required
/// key is missing or a port is not a number.
pub fn read_registration(path: &Path) -> Result<DeviceId, RegistrationError> {
    let values = read_key_value_file(path)?;
    parse_registration(&values, path)
}

fn parse_registration(values: &KeyValues, path: &Path) -> Result<DeviceId, RegistrationError> {
    let required = |key: &'static str| {
        values
            .get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RegistrationError::MissingKey { file: path.to_path_buf(), key })
    };
    let port = |key: &'static str| -> Result<u16, RegistrationError> {
        let value = required(key)?;
        value.parse().map_err(|_| RegistrationError::InvalidValue {
            file: path.to_path_buf(),
            key,
            value: value.to_string(),
        })
    };

    let avd_name = required("avd.name")?.to_string();
    let command_line = match values.get("cmdline") {
        Some(cmdline) => decode_args(cmdline).map_err(|_| RegistrationError::InvalidValue {
            file: path.to_path_buf(),
            key: "cmdline",
            value: cmdline.to_string(),
        })?,
        None => Vec::new(),
    };

    Ok(DeviceId {
        avd_id: values.get("avd.id").unwrap_or(avd_name.as_str()).to_string(),
        avd_folder: PathBuf::from(required("avd.dir")?),
        avd_name,
        serial_port: port("port.serial")?,
        adb_port: port("port.adb")?,
        command_line,
        rpc_port: port("grpc.port")?,
        rpc_token: values.get("grpc.token").filter(|t| !t.is_empty()).map(str::to_string),
        registration_file: path.to_path_buf(),
    })
}

/// Writes a registration file for `device`, e.g. for a device started by
/// this process.
///
/// # Errors
///
/// Returns [`RegistrationError::File`] if the file cannot be written.
pub fn write_registration(path: &Path, device: &DeviceId) -> Result<(), RegistrationError> {
    let mut values = KeyValues::new();
    values.set("port.serial", &device.serial_port.to_string());
    values.set("port.adb", &device.adb_port.to_string());
    values.set("avd.name", &device.avd_name);
    values.set("avd.dir", &device.avd_folder.to_string_lossy());
    values.set("avd.id", &device.avd_id);
    values.set("cmdline", &encode_args(&device.command_line));
    values.set("grpc.port", &device.rpc_port.to_string());
    if let Some(token) = &device.rpc_token {
        values.set("grpc.token", token);
    }
    write_key_value_file(path, &values)?;
    Ok(())
}

/// `true` for file names of the form `pid_<digits>.ini`.
fn is_registration_file_name(name: &str) -> bool {
    name.strip_prefix("pid_")
        .and_then(|rest| rest.strip_suffix(".ini"))
        .is_some_and(|pid| !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit()))
}

/// Lists the devices registered in `dir`, ordered by serial port.
/// Unreadable or malformed files are skipped with a warning.
///
/// # Errors
///
/// Returns [`RegistrationError::Scan`] if the directory cannot be listed.
pub fn scan_registration_dir(dir: &Path) -> Result<Vec<DeviceId>, RegistrationError> {
    let entries = std::fs::read_dir(dir).map_err(|source| RegistrationError::Scan {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut devices = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_registration_file_name(&name.to_string_lossy()) {
            continue;
        }
        match read_registration(&entry.path()) {
            Ok(device) => devices.push(device),
            Err(e) => warn!("skipping registration file: {e}"),
        }
    }
    devices.sort_by_key(|d| d.serial_port);
    debug!("found {} running device(s) in {}", devices.len(), dir.display());
    Ok(devices)
}

/// Default directory device processes register in.
pub fn default_registration_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir).join("avd").join("running"));
    }
    #[cfg(target_os = "macos")]
    if let Some(home) = std::env::var_os("HOME") {
        return Some(PathBuf::from(home).join("Library/Caches/TemporaryItems/avd/running"));
    }
    #[cfg(target_os = "windows")]
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        return Some(PathBuf::from(local).join("Temp").join("avd").join("running"));
    }
    let tmp = std::env::var_os("TMPDIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
    Some(tmp.join("avd").join("running"))
}
