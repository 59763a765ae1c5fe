//! Transport seam between the session and the RPC channel implementation.
//!
//! The session never touches sockets.  It talks to an [`RpcChannel`] opened
//! by a [`ChannelFactory`]; production code injects the TCP implementation
//! from `infrastructure::network`, tests inject the recording mock.
//!
//! # Calls and streams (for beginners)
//!
//! A *unary* call sends one request and awaits one response.  A
//! *server-streaming* call sends one request and then receives any number of
//! items until the stream ends, fails, or is cancelled:
//!
//! ```text
//! session ──StreamScreenshot──▶ channel
//!         ◀──Ok(Image #0)──────
//!         ◀──Ok(Image #1)──────
//!         ◀──Err(Cancelled)──── (after RpcStream::call.cancel(..))
//! ```
//!
//! The items arrive on an `mpsc` receiver owned by the subscriber, so the
//! consumer is a plain loop in an async task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirror_core::protocol::messages::{RpcRequest, RpcResponse};
use mirror_core::protocol::status::RpcStatus;
use tokio::sync::{mpsc, watch};

use crate::application::device::Endpoint;

/// Connectivity of the underlying channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

/// Options fixed when the channel is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Largest inbound message the channel accepts.
    pub max_inbound_message_size: usize,
    /// Frames are raw pixels, compressing them costs CPU for nothing.
    pub compression_enabled: bool,
    pub bearer_token: Option<String>,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub deadline: Option<Duration>,
}

impl CallOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self { deadline: Some(deadline) }
    }
}

/// Handle to an in-progress streaming call.
pub trait ClientCall: Send + Sync {
    /// Cancels the call; its stream ends with a `Cancelled` status carrying
    /// `reason`.
    fn cancel(&self, reason: &str);
}

/// Items of a server-streaming call.  The receiver yields `Err` once, as the
/// final item, when the call fails or is cancelled; it closes without an
/// error when the stream completes normally.
pub struct RpcStream {
    pub items: mpsc::Receiver<Result<RpcResponse, RpcStatus>>,
    pub call: Arc<dyn ClientCall>,
}

/// A connected (or connecting) RPC channel.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Performs a unary call.
    async fn unary(&self, request: RpcRequest, options: CallOptions) -> Result<RpcResponse, RpcStatus>;

    /// Starts a server-streaming call.
    ///
    /// # Errors
    ///
    /// Returns [`RpcStatus`] if the call cannot be started at all (e.g. the
    /// channel is shut down).
    fn server_streaming(&self, request: RpcRequest) -> Result<RpcStream, RpcStatus>;

    /// Current connectivity.
    fn state(&self) -> ChannelState;

    /// Receiver notified on every connectivity change.
    fn watch_state(&self) -> watch::Receiver<ChannelState>;

    /// Closes the channel, failing outstanding calls.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool {
        self.state() == ChannelState::Shutdown
    }
}

/// Opens channels to device endpoints.
pub trait ChannelFactory: Send + Sync {
    /// Creates a channel to `endpoint`.  The channel connects in the
    /// background; connectivity is reported through
    /// [`RpcChannel::watch_state`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcStatus`] if the endpoint cannot be used at all.
    fn open(&self, endpoint: &Endpoint, options: ChannelOptions) -> Result<Arc<dyn RpcChannel>, RpcStatus>;
}
