//! Storage infrastructure: the files a device mirror reads and writes.
//!
//! - **`kvfile`** – the `key=value` format shared by all device files.
//! - **`registration`** – `pid_<pid>.ini` files announcing running devices.
//! - **`device_config`** – `config.ini` / `hardware-qemu.ini` of a device,
//!   exposed to the session as a [`DeviceConfigurationSource`].
//! - **`skin`** – frame geometry from a skin folder's `layout.ini`.
//! - **`config`** – the client's own TOML settings.
//! - **`mock`** – an in-memory configuration source for tests.
//!
//! [`DeviceConfigurationSource`]: crate::application::device::DeviceConfigurationSource

pub mod config;
pub mod device_config;
pub mod kvfile;
pub mod mock;
pub mod registration;
pub mod skin;
