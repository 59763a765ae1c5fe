//! Call status codes.
//!
//! A failed call carries an [`RpcStatus`]: a [`StatusCode`] classifying the
//! failure plus a human-readable message.  The codes follow the numbering
//! that streaming RPC stacks conventionally use, so a status logged here reads
//! the same as one logged by the device side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    Unauthenticated = 16,
}

impl TryFrom<u8> for StatusCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::Cancelled),
            2 => Ok(StatusCode::Unknown),
            3 => Ok(StatusCode::InvalidArgument),
            4 => Ok(StatusCode::DeadlineExceeded),
            5 => Ok(StatusCode::NotFound),
            8 => Ok(StatusCode::ResourceExhausted),
            9 => Ok(StatusCode::FailedPrecondition),
            12 => Ok(StatusCode::Unimplemented),
            13 => Ok(StatusCode::Internal),
            14 => Ok(StatusCode::Unavailable),
            16 => Ok(StatusCode::Unauthenticated),
            _ => Err(()),
        }
    }
}

/// Outcome of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == StatusCode::Cancelled
    }

    pub fn is_unavailable(&self) -> bool {
        self.code == StatusCode::Unavailable
    }
}
