//! Infrastructure layer for the mirroring client.
//!
//! Contains the OS-facing adapters behind the application traits.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `mirror_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – `TcpChannel`, the multiplexed RPC channel to a device,
//!   with automatic reconnection, plus `MockRpcChannel` for tests.
//!
//! - **`storage`** – registration files, device configuration, skins and the
//!   client's TOML settings.
//!
//! - **`ui_thread`** – the dedicated thread that owns the displayed image.

pub mod network;
pub mod storage;
pub mod ui_thread;
