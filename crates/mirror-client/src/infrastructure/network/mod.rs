//! TCP implementation of the RPC channel.
//!
//! Architecture:
//! - `TcpChannelFactory::open` returns immediately; a driver task owns the
//!   socket and (re)connects in the background.
//! - Frames are read and written through `tokio_util::codec::Framed` with
//!   [`FrameCodec`], which wraps the core frame codec and enforces the
//!   inbound size limit.
//! - Every call registers a [`PendingCall`] under its call id; the driver
//!   routes inbound responses, stream items and statuses to it.
//!
//! ```text
//!  unary()/server_streaming()          driver task
//!  ──────────────────────────          ───────────
//!  register PendingCall  ──outbound──▶ Framed::send
//!  await oneshot / mpsc  ◀──route───── Framed::next
//! ```
//!
//! The first frame on every connection is a `Metadata` frame carrying the
//! `authorization: Bearer <token>` value and the inbound size limit.

pub mod mock;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::{SinkExt, StreamExt};
use mirror_core::protocol::codec::{decode_frame, encode_frame_into, DecodeLimits, Frame, FrameHeader, FrameKind, ProtocolError};
use mirror_core::protocol::messages::{ConnectionMetadata, RpcRequest, RpcResponse, HEADER_SIZE};
use mirror_core::protocol::sequence::SequenceCounter;
use mirror_core::protocol::status::RpcStatus;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::device::Endpoint;
use crate::application::transport::{
    CallOptions, ChannelFactory, ChannelOptions, ChannelState, ClientCall, RpcChannel, RpcStream,
};

/// Delay before the first reconnection attempt; doubles up to [`MAX_BACKOFF`].
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Items queued per server-streaming call.  The queue holds one more slot,
/// kept free for the status that ends the call.
const STREAM_CAPACITY: usize = 64;

type StreamSender = mpsc::Sender<Result<RpcResponse, RpcStatus>>;
type StreamReceiver = mpsc::Receiver<Result<RpcResponse, RpcStatus>>;

fn stream_queue() -> (StreamSender, StreamReceiver) {
    mpsc::channel(STREAM_CAPACITY + 1)
}

/// Errors on an established connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection closed by device")]
    Closed,
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Length-delimited framing on top of the core frame format.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    limits: DecodeLimits,
}

impl FrameCodec {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ChannelError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        // Rejects oversized frames before their payload is buffered.
        let header = FrameHeader::parse(&src[..HEADER_SIZE], &self.limits)?;
        let total = HEADER_SIZE + header.payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let (frame, used) = decode_frame(&src[..total], &self.limits)?;
        src.advance(used);
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ChannelError> {
        let mut buf = Vec::with_capacity(frame.encoded_len());
        encode_frame_into(&frame, &mut buf);
        dst.extend_from_slice(&buf);
        Ok(())
    }
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Where the result of a call goes.
enum PendingCall {
    Unary(oneshot::Sender<Result<RpcResponse, RpcStatus>>),
    Stream(StreamSender),
}

impl PendingCall {
    fn fail(self, status: RpcStatus) {
        match self {
            PendingCall::Unary(tx) => {
                let _ = tx.send(Err(status));
            }
            PendingCall::Stream(tx) => {
                let _ = tx.try_send(Err(status));
            }
        }
    }
}

struct ChannelInner {
    address: String,
    options: ChannelOptions,
    state: watch::Sender<ChannelState>,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    ids: SequenceCounter,
    lifetime: CancellationToken,
}

impl ChannelInner {
    /// Moves to `next` unless the channel is shut down.
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == ChannelState::Shutdown || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn current_state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn register(&self, call_id: u64, call: PendingCall) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(call_id, call);
        }
    }

    fn take(&self, call_id: u64) -> Option<PendingCall> {
        self.pending.lock().ok()?.remove(&call_id)
    }

    fn fail_all(&self, status: &RpcStatus) {
        let calls: Vec<PendingCall> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().map(|(_, call)| call).collect(),
            Err(_) => return,
        };
        for call in calls {
            call.fail(status.clone());
        }
    }

    /// Checks that a call can be started now.
    fn admit(&self) -> Result<(), RpcStatus> {
        match self.current_state() {
            ChannelState::Shutdown => Err(RpcStatus::unavailable("channel is shut down")),
            ChannelState::TransientFailure => Err(RpcStatus::unavailable(format!("{} is unreachable", self.address))),
            ChannelState::Idle | ChannelState::Connecting | ChannelState::Ready => Ok(()),
        }
    }

    fn send(&self, frame: Frame) -> Result<(), RpcStatus> {
        self.outbound
            .send(frame)
            .map_err(|_| RpcStatus::unavailable("channel is shut down"))
    }

    fn send_cancel(&self, call_id: u64, reason: &str) {
        match Frame::cancel(call_id, reason) {
            Ok(frame) => {
                let _ = self.send(frame);
            }
            Err(e) => warn!("unable to encode cancellation of call {call_id}: {e}"),
        }
    }

    fn route(&self, frame: Frame) {
        match frame.kind {
            FrameKind::Response => {
                if let Some(call) = self.take(frame.call_id) {
                    let result = frame
                        .decode_payload::<RpcResponse>()
                        .map_err(|e| RpcStatus::internal(e.to_string()));
                    match call {
                        PendingCall::Unary(tx) => {
                            let _ = tx.send(result);
                        }
                        PendingCall::Stream(tx) => {
                            let _ = tx.try_send(result);
                        }
                    }
                }
            }
            FrameKind::StreamItem => {
                let item = frame
                    .decode_payload::<RpcResponse>()
                    .map_err(|e| RpcStatus::internal(e.to_string()));
                let Ok(pending) = self.pending.lock() else { return };
                if let Some(PendingCall::Stream(tx)) = pending.get(&frame.call_id) {
                    if tx.capacity() <= 1 || tx.try_send(item).is_err() {
                        debug!("call {}: consumer is behind, stream item dropped", frame.call_id);
                    }
                }
            }
            FrameKind::StreamEnd => {
                // Dropping the sender closes the stream without an error.
                self.take(frame.call_id);
            }
            FrameKind::Status | FrameKind::Cancel => {
                if let Some(call) = self.take(frame.call_id) {
                    let status = frame
                        .decode_payload::<RpcStatus>()
                        .unwrap_or_else(|e| RpcStatus::internal(e.to_string()));
                    call.fail(status);
                }
            }
            FrameKind::Metadata | FrameKind::Request => {
                debug!("ignoring unexpected {:?} frame from device", frame.kind);
            }
        }
    }
}

/// RPC channel over one TCP connection with automatic reconnection.
pub struct TcpChannel {
    inner: Arc<ChannelInner>,
}

impl TcpChannel {
    /// Creates the channel and starts connecting on `runtime`.
    pub fn open(runtime: &Handle, endpoint: &Endpoint, options: ChannelOptions) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Idle);
        let inner = Arc::new(ChannelInner {
            address: endpoint.address(),
            options,
            state,
            outbound,
            pending: Mutex::new(HashMap::new()),
            ids: SequenceCounter::new(),
            lifetime: CancellationToken::new(),
        });
        runtime.spawn(drive(Arc::clone(&inner), outbound_rx));
        Self { inner }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.inner.lifetime.cancel();
    }
}

#[async_trait]
impl RpcChannel for TcpChannel {
    async fn unary(&self, request: RpcRequest, options: CallOptions) -> Result<RpcResponse, RpcStatus> {
        self.inner.admit()?;
        let call_id = self.inner.ids.next();
        let frame = Frame::request(call_id, &request).map_err(|e| RpcStatus::internal(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        self.inner.register(call_id, PendingCall::Unary(tx));
        if let Err(status) = self.inner.send(frame) {
            self.inner.take(call_id);
            return Err(status);
        }

        let outcome = match options.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.take(call_id);
                    self.inner.send_cancel(call_id, "deadline exceeded");
                    return Err(RpcStatus::deadline_exceeded(format!(
                        "deadline exceeded after {} ms",
                        deadline.as_millis()
                    )));
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| Err(RpcStatus::unavailable("channel closed")))
    }

    fn server_streaming(&self, request: RpcRequest) -> Result<RpcStream, RpcStatus> {
        self.inner.admit()?;
        let call_id = self.inner.ids.next();
        let frame = Frame::request(call_id, &request).map_err(|e| RpcStatus::internal(e.to_string()))?;
        let (tx, items) = stream_queue();
        self.inner.register(call_id, PendingCall::Stream(tx));
        if let Err(status) = self.inner.send(frame) {
            self.inner.take(call_id);
            return Err(status);
        }
        Ok(RpcStream {
            items,
            call: Arc::new(TcpCall {
                call_id,
                channel: Arc::downgrade(&self.inner),
            }),
        })
    }

    fn state(&self) -> ChannelState {
        self.inner.current_state()
    }

    fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    fn shutdown(&self) {
        self.inner.set_state(ChannelState::Shutdown);
        self.inner.lifetime.cancel();
        self.inner.fail_all(&RpcStatus::unavailable("channel is shut down"));
    }
}

/// Cancellation handle of a streaming call.
struct TcpCall {
    call_id: u64,
    channel: Weak<ChannelInner>,
}

impl ClientCall for TcpCall {
    fn cancel(&self, reason: &str) {
        let Some(channel) = self.channel.upgrade() else { return };
        if let Some(call) = channel.take(self.call_id) {
            call.fail(RpcStatus::cancelled(reason));
            channel.send_cancel(self.call_id, reason);
        }
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// Connects, serves the connection until it drops, then reconnects with
/// exponential backoff.  Ends when the channel is shut down or dropped.
async fn drive(inner: Arc<ChannelInner>, mut outbound: mpsc::UnboundedReceiver<Frame>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        inner.set_state(ChannelState::Connecting);
        let connected = tokio::select! {
            _ = inner.lifetime.cancelled() => break,
            result = TcpStream::connect(inner.address.as_str()) => result,
        };

        match connected {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                info!("connected to {}", inner.address);
                match serve(&inner, stream, &mut outbound).await {
                    Ok(()) => break,
                    Err(e) => warn!("connection to {} lost: {e}", inner.address),
                }
            }
            Err(e) => debug!("unable to connect to {}: {e}", inner.address),
        }

        inner.set_state(ChannelState::TransientFailure);
        inner.fail_all(&RpcStatus::unavailable(format!("connection to {} lost", inner.address)));
        // Requests queued for the lost connection have no one waiting anymore.
        while outbound.try_recv().is_ok() {}

        tokio::select! {
            _ = inner.lifetime.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
    inner.set_state(ChannelState::Shutdown);
    inner.fail_all(&RpcStatus::unavailable("channel is shut down"));
}

/// Serves one connection.  `Ok` means the channel was shut down.
async fn serve(
    inner: &ChannelInner,
    stream: TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
) -> Result<(), ChannelError> {
    stream.set_nodelay(true)?;
    let limits = DecodeLimits {
        max_message_size: inner.options.max_inbound_message_size,
        compression_enabled: inner.options.compression_enabled,
    };
    let mut framed = Framed::new(stream, FrameCodec::new(limits));

    let metadata = ConnectionMetadata {
        authorization: inner.options.bearer_token.as_ref().map(|token| format!("Bearer {token}")),
        max_inbound_message_size: u32::try_from(limits.max_message_size).unwrap_or(u32::MAX),
        compression_enabled: limits.compression_enabled,
    };
    framed.send(Frame::metadata(&metadata)?).await?;
    inner.set_state(ChannelState::Ready);

    loop {
        tokio::select! {
            _ = inner.lifetime.cancelled() => return Ok(()),
            frame = outbound.recv() => match frame {
                Some(frame) => framed.send(frame).await?,
                None => return Ok(()),
            },
            inbound = framed.next() => match inbound {
                Some(frame) => inner.route(frame?),
                None => return Err(ChannelError::Closed),
            },
        }
    }
}

/// Opens [`TcpChannel`]s on the runtime the factory was created on.
pub struct TcpChannelFactory {
    runtime: Handle,
}

impl TcpChannelFactory {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl ChannelFactory for TcpChannelFactory {
    fn open(&self, endpoint: &Endpoint, options: ChannelOptions) -> Result<Arc<dyn RpcChannel>, RpcStatus> {
        if endpoint.port == 0 {
            return Err(RpcStatus::new(
                mirror_core::protocol::status::StatusCode::InvalidArgument,
                format!("{} has no RPC port", endpoint.host),
            ));
        }
        debug!("opening channel to {}", endpoint.address());
        Ok(Arc::new(TcpChannel::open(&self.runtime, endpoint, options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::protocol::codec::encode_frame;
    use mirror_core::protocol::messages::VmRunState;
    use tokio::net::TcpListener;

    fn limits(max: usize) -> DecodeLimits {
        DecodeLimits {
            max_message_size: max,
            compression_enabled: false,
        }
    }

    #[test]
    fn test_codec_waits_for_complete_frame() {
        // Arrange
        let frame = Frame::response(7, &RpcResponse::VmRunState(VmRunState::default())).unwrap();
        let bytes = encode_frame(&frame);
        let mut codec = FrameCodec::new(limits(1024));
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);

        // Act
        let partial = codec.decode(&mut buf).unwrap();
        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        let complete = codec.decode(&mut buf).unwrap();

        // Assert
        assert!(partial.is_none());
        assert_eq!(complete, Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_rejects_oversized_frame_from_header() {
        let frame = Frame::request(1, &RpcRequest::LoadSnapshot("x".repeat(200))).unwrap();
        let bytes = encode_frame(&frame);
        let mut codec = FrameCodec::new(limits(100));
        let mut buf = BytesMut::from(&bytes[..HEADER_SIZE]);

        let result = codec.decode(&mut buf);

        assert!(matches!(
            result,
            Err(ChannelError::Protocol(ProtocolError::MessageTooLarge { limit: 100, .. }))
        ));
    }

    fn detached_channel() -> ChannelInner {
        let (outbound, _) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Ready);
        ChannelInner {
            address: "127.0.0.1:9".to_string(),
            options: ChannelOptions {
                max_inbound_message_size: 1024,
                compression_enabled: false,
                bearer_token: None,
            },
            state,
            outbound,
            pending: Mutex::new(HashMap::new()),
            ids: SequenceCounter::new(),
            lifetime: CancellationToken::new(),
        }
    }

    #[test]
    fn test_final_status_reaches_consumer_of_full_stream() {
        // Arrange: a consumer that reads nothing while the device floods it
        let inner = detached_channel();
        let (tx, mut items) = stream_queue();
        inner.register(5, PendingCall::Stream(tx));
        for _ in 0..STREAM_CAPACITY + 10 {
            inner.route(Frame::stream_item(5, &RpcResponse::Empty).unwrap());
        }

        // Act
        inner.route(Frame::status(5, &RpcStatus::unavailable("device stopped")).unwrap());

        // Assert
        let mut received = Vec::new();
        while let Ok(item) = items.try_recv() {
            received.push(item);
        }
        assert_eq!(received.len(), STREAM_CAPACITY + 1);
        assert!(received[..STREAM_CAPACITY].iter().all(Result::is_ok));
        assert!(matches!(received.last(), Some(Err(status)) if status.is_unavailable()));
    }

    #[test]
    fn test_failing_all_calls_reaches_full_stream() {
        let inner = detached_channel();
        let (tx, mut items) = stream_queue();
        inner.register(6, PendingCall::Stream(tx));
        for _ in 0..STREAM_CAPACITY {
            inner.route(Frame::stream_item(6, &RpcResponse::Empty).unwrap());
        }

        inner.fail_all(&RpcStatus::unavailable("connection lost"));

        let mut last = None;
        while let Ok(item) = items.try_recv() {
            last = Some(item);
        }
        assert!(matches!(last, Some(Err(status)) if status.is_unavailable()));
    }

    #[tokio::test]
    async fn test_unary_call_round_trip_over_tcp() {
        // Arrange: a one-shot device that answers GetVmState.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, FrameCodec::new(limits(1 << 20)));
            let metadata = framed.next().await.unwrap().unwrap();
            let request = framed.next().await.unwrap().unwrap();
            let reply = Frame::response(request.call_id, &RpcResponse::VmRunState(VmRunState::default())).unwrap();
            framed.send(reply).await.unwrap();
            // The connection stays open until the test joins this task.
            (metadata.decode_payload::<ConnectionMetadata>().unwrap(), framed)
        });
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            bearer_token: Some("secret".to_string()),
        };
        let options = ChannelOptions {
            max_inbound_message_size: 1 << 20,
            compression_enabled: false,
            bearer_token: endpoint.bearer_token.clone(),
        };
        let channel = TcpChannelFactory::new(Handle::current()).open(&endpoint, options).unwrap();

        // Act
        let response = channel
            .unary(RpcRequest::GetVmState, CallOptions::with_deadline(Duration::from_secs(5)))
            .await;

        // Assert
        assert_eq!(response, Ok(RpcResponse::VmRunState(VmRunState::default())));
        assert_eq!(channel.state(), ChannelState::Ready);
        let (metadata, _connection) = device.await.unwrap();
        assert_eq!(metadata.authorization.as_deref(), Some("Bearer secret"));
        channel.shutdown();
        assert!(channel.is_shutdown());
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: 9,
            bearer_token: None,
        };
        let options = ChannelOptions {
            max_inbound_message_size: 1024,
            compression_enabled: false,
            bearer_token: None,
        };
        let channel = TcpChannel::open(&Handle::current(), &endpoint, options);

        channel.shutdown();
        let result = channel.unary(RpcRequest::GetStatus, CallOptions::default()).await;

        assert!(matches!(result, Err(status) if status.is_unavailable()));
        assert!(channel.server_streaming(RpcRequest::StreamNotification).is_err());
    }
}
