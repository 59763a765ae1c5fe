//! # mirror-core
//!
//! Shared library for device mirroring containing the RPC protocol codec,
//! display geometry, the multi-display layout optimizer and the command-line
//! decoder used for registration files.
//!
//! It has zero dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! A device mirror shows the screen of a running virtual device in a local
//! window and forwards keyboard, mouse and touch input back to it.  The
//! device streams frames over an RPC channel; the client renders them and
//! sends input calls in the other direction.
//!
//! This crate (`mirror-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How calls travel over the network.  Every call is
//!   carried in binary frames (24-byte header + bincode payload) tagged with
//!   a call id so that responses and stream items find their caller.
//!
//! - **`domain`** – Pure logic with no OS dependencies: display sizes,
//!   rotations and modes, the shape of a received frame, the split-tree
//!   layout optimizer, and shell-style argument decoding.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `mirror_core::Size` instead of `mirror_core::domain::display::Size`.
pub use domain::args::{decode_args, encode_args, ArgsError};
pub use domain::display::{
    DisplayMode, DisplayModeError, DisplayModeValue, DisplayShape, PostureRange, Rect, Rotation,
    ShapeKey, Size,
};
pub use domain::layout::{best_layout, LayoutError, LayoutNode, PanelLayout, SplitType};
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::messages::{RpcMethod, RpcRequest, RpcResponse};
pub use protocol::status::{RpcStatus, StatusCode};
