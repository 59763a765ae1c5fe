//! Domain types for device mirroring.
//!
//! This module contains pure logic with no infrastructure dependencies: no
//! sockets, no files, no threads.  Everything here can be unit-tested in
//! isolation.
//!
//! - **`display`** – sizes, rectangles, rotation, display modes, postures and
//!   the shape of a received frame.
//! - **`layout`** – the multi-display layout optimizer and the persisted
//!   split-panel tree.
//! - **`args`** – shell-style decoding of stored command lines.

pub mod args;
pub mod display;
pub mod layout;
