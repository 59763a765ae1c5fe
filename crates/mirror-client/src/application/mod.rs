//! Application layer of the mirroring client.
//!
//! # What lives here?
//!
//! - **`session`** – One connection to a running device: channel lifecycle,
//!   keep-alive probing, the connection state machine, typed wrappers for
//!   every RPC and serialized keyboard delivery (`keyboard_queue`).
//!
//! - **`display_view`** – One display of the device: requests a screenshot
//!   stream sized for the viewport, validates frames (`frame_stream`),
//!   decodes them (`frame_buffer`), computes the device frame (`skin`) and
//!   hands the result to the UI thread (`ui`).
//!
//! Nothing in this layer opens sockets or reads files.  Those concerns are
//! injected through the traits in `transport`, `device` and `ui`, and
//! implemented in `crate::infrastructure`.

pub mod connection;
pub mod device;
pub mod display_view;
pub mod frame_buffer;
pub mod frame_stats;
pub mod frame_stream;
pub mod keyboard_queue;
pub mod session;
pub mod skin;
pub mod transport;
pub mod ui;
