//! Protocol module containing RPC message types, call status and the binary
//! frame codec.

pub mod codec;
pub mod messages;
pub mod sequence;
pub mod status;

pub use codec::{decode_frame, encode_frame, DecodeLimits, Frame, FrameHeader, FrameKind, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
pub use status::{RpcStatus, StatusCode};
