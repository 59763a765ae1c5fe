//! mirror-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does mirror-client do? (for beginners)
//!
//! A virtual device (an emulator) runs as its own process and exposes an RPC
//! endpoint on `localhost`.  The client:
//!
//! 1. Finds the device through the registration file it wrote on start-up.
//! 2. Reads the device's configuration files to learn its display size,
//!    display modes and frame artwork.
//! 3. Opens a session: one RPC channel plus a heartbeat that decides whether
//!    the device is `Connecting`, `Connected` or `Disconnected`.
//! 4. Subscribes to a screenshot stream per display, validates and decodes
//!    every frame, and hands the newest one to the UI thread.
//! 5. Forwards keyboard, mouse and touch input back to the device.

/// Application layer: session, frame pipeline and the seams to the UI.
pub mod application;

/// Infrastructure layer: network channel, files and the UI thread.
pub mod infrastructure;
