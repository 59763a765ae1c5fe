//! Scripted in-memory RPC channel for tests.
//!
//! # Why a mock channel?
//!
//! The session and the display pipeline are driven entirely by what the
//! channel does: which calls succeed, which hang until their deadline, when
//! connectivity changes and what a stream delivers.  `MockRpcChannel`
//! records every request and lets a test script each of those outcomes.
//!
//! # Usage in tests
//!
//! ```ignore
//! let channel = Arc::new(MockRpcChannel::new());
//! channel.hold(RpcMethod::GetVmState);
//! let factory = Arc::new(MockChannelFactory::with_channel(Arc::clone(&channel)));
//! // ... connect a session through `factory` ...
//! channel.complete_held(RpcMethod::GetVmState, Ok(RpcResponse::VmRunState(VmRunState::default())));
//! ```
//!
//! Unscripted unary calls answer with [`default_response`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mirror_core::protocol::messages::{RpcMethod, RpcRequest, RpcResponse, RunState, VmRunState};
use mirror_core::protocol::status::RpcStatus;
use tokio::sync::{mpsc, oneshot, watch};

use crate::application::device::Endpoint;
use crate::application::transport::{
    CallOptions, ChannelFactory, ChannelOptions, ChannelState, ClientCall, RpcChannel, RpcStream,
};

type Reply = Result<RpcResponse, RpcStatus>;
type ItemSender = mpsc::Sender<Result<RpcResponse, RpcStatus>>;

/// Scripted outcome of one unary call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer immediately.
    Respond(Reply),
    /// Keep the call open until [`MockRpcChannel::complete_held`] or its deadline.
    Hold,
}

/// Answer of an unscripted unary call: a running VM for `getVmState`,
/// an empty response otherwise.
pub fn default_response(method: RpcMethod) -> Reply {
    match method {
        RpcMethod::GetVmState => Ok(RpcResponse::VmRunState(VmRunState { state: RunState::Running })),
        _ => Ok(RpcResponse::Empty),
    }
}

/// One server-streaming call opened on the mock.
#[derive(Clone)]
pub struct MockStream {
    pub request: RpcRequest,
    sender: Arc<Mutex<Option<ItemSender>>>,
    cancelled: Arc<Mutex<Option<String>>>,
}

impl MockStream {
    /// Delivers an item.  Returns `false` when the stream is closed or full.
    pub fn send(&self, item: RpcResponse) -> bool {
        self.push(Ok(item))
    }

    /// Fails the stream with `status`.
    pub fn fail(&self, status: RpcStatus) -> bool {
        let delivered = self.push(Err(status));
        self.close();
        delivered
    }

    /// Completes the stream normally.
    pub fn end(&self) {
        self.close();
    }

    pub fn is_open(&self) -> bool {
        self.sender
            .lock()
            .map(|s| s.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Reason passed to [`ClientCall::cancel`], if the client cancelled.
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancelled.lock().ok().and_then(|r| r.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    fn push(&self, item: Reply) -> bool {
        self.sender
            .lock()
            .map(|s| s.as_ref().is_some_and(|tx| tx.try_send(item).is_ok()))
            .unwrap_or(false)
    }

    fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

struct MockCall {
    stream: MockStream,
}

impl ClientCall for MockCall {
    fn cancel(&self, reason: &str) {
        if let Ok(mut cancelled) = self.stream.cancelled.lock() {
            if cancelled.is_some() {
                return;
            }
            *cancelled = Some(reason.to_string());
        }
        self.stream.fail(RpcStatus::cancelled(reason));
    }
}

/// Recording, scripted [`RpcChannel`].
pub struct MockRpcChannel {
    requests: Mutex<Vec<RpcRequest>>,
    scripted: Mutex<HashMap<RpcMethod, VecDeque<MockReply>>>,
    held: Mutex<Vec<(RpcMethod, oneshot::Sender<Reply>)>>,
    streams: Mutex<Vec<MockStream>>,
    state: watch::Sender<ChannelState>,
    shutdown_called: AtomicBool,
    stream_capacity: usize,
}

impl Default for MockRpcChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRpcChannel {
    /// A channel in the `Connecting` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            held: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            state,
            shutdown_called: AtomicBool::new(false),
            stream_capacity: 256,
        }
    }

    /// Scripts the next unscripted call of `method`.
    pub fn reply(&self, method: RpcMethod, reply: Reply) {
        self.script(method, MockReply::Respond(reply));
    }

    /// Makes the next call of `method` hang.
    pub fn hold(&self, method: RpcMethod) {
        self.script(method, MockReply::Hold);
    }

    pub fn script(&self, method: RpcMethod, reply: MockReply) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.entry(method).or_default().push_back(reply);
        }
    }

    /// Completes the oldest held call of `method`.  Returns `false` when
    /// there is none or its caller has gone.
    pub fn complete_held(&self, method: RpcMethod, reply: Reply) -> bool {
        let held = self.held.lock().ok().and_then(|mut held| {
            let index = held.iter().position(|(m, tx)| *m == method && !tx.is_closed())?;
            Some(held.remove(index).1)
        });
        held.is_some_and(|tx| tx.send(reply).is_ok())
    }

    /// Number of held calls of `method` whose caller is still waiting.
    pub fn held_count(&self, method: RpcMethod) -> usize {
        self.held
            .lock()
            .map(|held| held.iter().filter(|(m, tx)| *m == method && !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, method: RpcMethod) -> Vec<RpcRequest> {
        self.requests().into_iter().filter(|r| r.method() == method).collect()
    }

    pub fn request_count(&self, method: RpcMethod) -> usize {
        self.requests_for(method).len()
    }

    /// Every stream opened so far, oldest first.
    pub fn streams(&self) -> Vec<MockStream> {
        self.streams.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// The most recent stream of `method`.
    pub fn last_stream(&self, method: RpcMethod) -> Option<MockStream> {
        self.streams().into_iter().rev().find(|s| s.request.method() == method)
    }

    /// Reports a connectivity change to watchers.
    pub fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    pub fn was_shut_down(&self) -> bool {
        self.shutdown_called.load(Ordering::SeqCst)
    }

    /// Yields to other tasks until at least `count` requests of `method`
    /// were recorded.  Does not advance the (possibly paused) clock.
    pub async fn wait_for_requests(&self, method: RpcMethod, count: usize) -> bool {
        for _ in 0..10_000 {
            if self.request_count(method) >= count {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    fn record(&self, request: &RpcRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }

    fn next_reply(&self, method: RpcMethod) -> MockReply {
        self.scripted
            .lock()
            .ok()
            .and_then(|mut scripted| scripted.get_mut(&method)?.pop_front())
            .unwrap_or_else(|| MockReply::Respond(default_response(method)))
    }
}

#[async_trait]
impl RpcChannel for MockRpcChannel {
    async fn unary(&self, request: RpcRequest, options: CallOptions) -> Result<RpcResponse, RpcStatus> {
        let method = request.method();
        self.record(&request);
        if self.was_shut_down() {
            return Err(RpcStatus::unavailable("channel is shut down"));
        }

        let rx = match self.next_reply(method) {
            MockReply::Respond(reply) => return reply,
            MockReply::Hold => {
                let (tx, rx) = oneshot::channel();
                if let Ok(mut held) = self.held.lock() {
                    held.push((method, tx));
                }
                rx
            }
        };

        let outcome = match options.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(RpcStatus::deadline_exceeded("deadline exceeded")),
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| Err(RpcStatus::unavailable("channel is shut down")))
    }

    fn server_streaming(&self, request: RpcRequest) -> Result<RpcStream, RpcStatus> {
        self.record(&request);
        if self.was_shut_down() {
            return Err(RpcStatus::unavailable("channel is shut down"));
        }
        let (tx, items) = mpsc::channel(self.stream_capacity);
        let stream = MockStream {
            request,
            sender: Arc::new(Mutex::new(Some(tx))),
            cancelled: Arc::new(Mutex::new(None)),
        };
        if let Ok(mut streams) = self.streams.lock() {
            streams.push(stream.clone());
        }
        Ok(RpcStream {
            items,
            call: Arc::new(MockCall { stream }),
        })
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
        self.set_state(ChannelState::Shutdown);
        // Dropping the responders fails held calls with UNAVAILABLE.
        if let Ok(mut held) = self.held.lock() {
            held.clear();
        }
        for stream in self.streams() {
            stream.fail(RpcStatus::unavailable("channel is shut down"));
        }
    }
}

/// Hands out scripted channels in order and records what was opened.
#[derive(Default)]
pub struct MockChannelFactory {
    outcomes: Mutex<VecDeque<Result<Arc<MockRpcChannel>, RpcStatus>>>,
    pub opened: Mutex<Vec<(Endpoint, ChannelOptions)>>,
}

impl MockChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(channel: Arc<MockRpcChannel>) -> Self {
        let factory = Self::new();
        factory.push(Ok(channel));
        factory
    }

    pub fn push(&self, outcome: Result<Arc<MockRpcChannel>, RpcStatus>) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn last_options(&self) -> Option<ChannelOptions> {
        self.opened.lock().ok()?.last().map(|(_, options)| options.clone())
    }
}

impl ChannelFactory for MockChannelFactory {
    fn open(&self, endpoint: &Endpoint, options: ChannelOptions) -> Result<Arc<dyn RpcChannel>, RpcStatus> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push((endpoint.clone(), options));
        }
        let outcome = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| Err(RpcStatus::unavailable("no channel scripted")));
        outcome.map(|channel| channel as Arc<dyn RpcChannel>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_held_call_times_out_at_deadline() {
        // Arrange
        let channel = MockRpcChannel::new();
        channel.hold(RpcMethod::GetVmState);

        // Act
        let result = channel
            .unary(RpcRequest::GetVmState, CallOptions::with_deadline(Duration::from_secs(3)))
            .await;

        // Assert
        assert_eq!(result.unwrap_err().code, mirror_core::protocol::status::StatusCode::DeadlineExceeded);
        assert_eq!(channel.request_count(RpcMethod::GetVmState), 1);
    }

    #[tokio::test]
    async fn test_cancelled_stream_reports_reason_once() {
        // Arrange
        let channel = MockRpcChannel::new();
        let mut stream = channel.server_streaming(RpcRequest::StreamNotification).unwrap();
        let handle = channel.last_stream(RpcMethod::StreamNotification).unwrap();

        // Act
        stream.call.cancel("view closed");
        stream.call.cancel("again");

        // Assert
        assert_eq!(handle.cancel_reason().as_deref(), Some("view closed"));
        assert!(matches!(stream.items.recv().await, Some(Err(status)) if status.is_cancelled()));
        assert!(stream.items.recv().await.is_none());
    }
}
