//! Session with one running device: connection, liveness and RPC wrappers.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! SessionController::new ──▶ connect()
//!                              │ resolve configuration (blocking pool)
//!                              │   └─ failure ─────────────▶ Disconnected
//!                              ▼
//!                            open channel ──▶ Connecting
//!                              │
//!                              ├─ connectivity watcher  (channel state → ConnectionState)
//!                              └─ keep-alive loop       (getVmState every interval)
//!                                   ├─ success          ─▶ Connected
//!                                   └─ Unavailable, or any
//!                                      failure before Connected ─▶ Disconnected
//! ```
//!
//! The session never reconnects.  Once `Disconnected` the owner drops it
//! and creates a new one.
//!
//! # Calls
//!
//! Every outbound call goes through one wrapper that
//!
//! - writes a trace line when `trace.grpc_calls` is on (mouse, touch and
//!   wheel input additionally need `trace.high_volume_grpc_calls`),
//! - moves the session to `Disconnected` on an `Unavailable` status,
//! - logs failures except cancellations and failures on a shut down channel.
//!
//! Keyboard events go through [`KeyboardQueue`] so that they reach the
//! device in the order they were typed.  Mouse, touch and wheel events are
//! fire-and-forget.
//!
//! # Shutdown
//!
//! [`SessionController::shutdown`] asks the device to power off at most
//! once.  If the session is not yet `Connected` the request is parked and
//! the next successful heartbeat sends it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use mirror_core::domain::display::DisplayModeValue;
use mirror_core::protocol::messages::{
    ClipData, DisplayConfigurations, EmulatorStatus, ImageFormat, ImageMessage, KeyboardEvent, MouseEvent,
    Notification, PhysicalModelValue, PhysicalType, RotationRadian, RpcMethod, RpcRequest, RpcResponse, RunState,
    SnapshotList, SnapshotPackage, ThemingStyle, TouchEvent, Velocity, VmRunState, WheelEvent,
};
use mirror_core::protocol::status::RpcStatus;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::connection::{ConnectionState, ConnectionStateCell, ConnectionStateListener, ListenerId};
use crate::application::device::{DeviceConfiguration, DeviceConfigurationSource, DeviceId};
use crate::application::keyboard_queue::{KeyEnvelope, KeyResult, KeyboardQueue};
use crate::application::skin::SkinDefinition;
use crate::application::transport::{CallOptions, ChannelFactory, ChannelOptions, ChannelState, ClientCall, RpcChannel};

/// Reason attached to streams cancelled by their consumer.
pub const STREAM_CANCEL_REASON: &str = "Canceled by consumer";

/// Logged in place of clipboard text.
const CLIPBOARD_PLACEHOLDER: &str = "<clipboard contents>";

// ── Settings ──────────────────────────────────────────────────────────────────

/// Which RPC traffic is written to the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSettings {
    pub grpc_calls: bool,
    pub high_volume_grpc_calls: bool,
    pub screenshots: bool,
}

/// Timing and sizing knobs of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub keep_alive_interval: Duration,
    /// Heartbeat deadline once the device has answered.
    pub connected_deadline: Duration,
    /// Heartbeat deadline while the device may still be booting.
    pub connecting_deadline: Duration,
    /// Bytes added to one full frame for the inbound size ceiling.
    pub inbound_size_margin: usize,
    pub trace: TraceSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(120),
            connected_deadline: Duration::from_secs(3),
            connecting_deadline: Duration::from_secs(15),
            inbound_size_margin: 100,
            trace: TraceSettings::default(),
        }
    }
}

/// Progress of the power-off request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    ShutdownRequested = 1,
    ShutdownSent = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownState::Running,
            1 => ShutdownState::ShutdownRequested,
            _ => ShutdownState::ShutdownSent,
        }
    }
}

// ── Typed responses ───────────────────────────────────────────────────────────

/// Extracts a typed value from an [`RpcResponse`], handing the response
/// back when it is of another kind.
pub trait FromResponse: Sized {
    fn from_response(response: RpcResponse) -> Result<Self, RpcResponse>;
}

impl FromResponse for () {
    fn from_response(response: RpcResponse) -> Result<Self, RpcResponse> {
        match response {
            RpcResponse::Empty => Ok(()),
            other => Err(other),
        }
    }
}

macro_rules! impl_from_response {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromResponse for $ty {
                fn from_response(response: RpcResponse) -> Result<Self, RpcResponse> {
                    match response {
                        RpcResponse::$variant(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_from_response! {
    ImageMessage => Image,
    ClipData => Clip,
    Notification => Notification,
    PhysicalModelValue => PhysicalModel,
    EmulatorStatus => Status,
    VmRunState => VmRunState,
    DisplayConfigurations => DisplayConfigurations,
    SnapshotList => SnapshotList,
    SnapshotPackage => SnapshotPackage,
}

fn unexpected_response(method: RpcMethod, response: &RpcResponse) -> RpcStatus {
    RpcStatus::internal(format!("unexpected {} response to {}", response.kind(), method.full_name()))
}

// ── Streams ───────────────────────────────────────────────────────────────────

/// Cancels one streaming call.  Cheap to clone.
#[derive(Clone)]
pub struct StreamCancel {
    call: Arc<dyn ClientCall>,
    session: Weak<SessionShared>,
}

impl StreamCancel {
    /// Cancels the call with [`STREAM_CANCEL_REASON`].  Does nothing unless
    /// the session is connected: a disconnected channel has already failed
    /// the call.  Returns `true` if the call was cancelled.
    pub fn cancel(&self) -> bool {
        match self.session.upgrade() {
            Some(shared) if shared.connection.get() == ConnectionState::Connected => {
                self.call.cancel(STREAM_CANCEL_REASON);
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for StreamCancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCancel").finish_non_exhaustive()
    }
}

/// Typed items of a server-streaming call.
///
/// `next()` yields `Some(Err(..))` once as the last item when the call fails
/// or is cancelled, and `None` after the stream ended.
pub struct Subscription<T> {
    method: RpcMethod,
    items: mpsc::Receiver<Result<RpcResponse, RpcStatus>>,
    cancel: StreamCancel,
    session: Weak<SessionShared>,
    _item: PhantomData<fn() -> T>,
}

impl<T: FromResponse> Subscription<T> {
    pub async fn next(&mut self) -> Option<Result<T, RpcStatus>> {
        let item = self.items.recv().await?;
        let shared = self.session.upgrade();
        match item {
            Ok(response) => {
                if let Some(shared) = &shared {
                    shared.trace_stream_item(self.method, &response);
                }
                Some(T::from_response(response).map_err(|other| unexpected_response(self.method, &other)))
            }
            Err(status) => {
                if let Some(shared) = &shared {
                    shared.on_call_error(self.method, &status);
                }
                Some(Err(status))
            }
        }
    }

    pub fn cancel_handle(&self) -> StreamCancel {
        self.cancel.clone()
    }

    /// See [`StreamCancel::cancel`].
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

struct SessionShared {
    device: DeviceId,
    factory: Arc<dyn ChannelFactory>,
    source: Arc<dyn DeviceConfigurationSource>,
    settings: SessionSettings,
    runtime: Handle,
    connection: ConnectionStateCell,
    shutdown: AtomicU8,
    connect_started: AtomicBool,
    disposed: AtomicBool,
    channel: RwLock<Option<Arc<dyn RpcChannel>>>,
    configuration: RwLock<Option<Arc<DeviceConfiguration>>>,
    skin: RwLock<Option<SkinDefinition>>,
    keyboard: KeyboardQueue,
    /// Cancelled by `dispose`; stops the watcher and the keep-alive loop.
    lifetime: CancellationToken,
    /// Child of `lifetime`; also cancelled once the shutdown RPC is sent.
    keep_alive: CancellationToken,
}

/// Handle to a device session.  Clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<SessionShared>,
}

impl SessionController {
    /// Creates a session.  Nothing happens until [`connect`](Self::connect).
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        device: DeviceId,
        factory: Arc<dyn ChannelFactory>,
        source: Arc<dyn DeviceConfigurationSource>,
        settings: SessionSettings,
    ) -> Self {
        let lifetime = CancellationToken::new();
        let keep_alive = lifetime.child_token();
        Self {
            shared: Arc::new(SessionShared {
                device,
                factory,
                source,
                settings,
                runtime: Handle::current(),
                connection: ConnectionStateCell::new(),
                shutdown: AtomicU8::new(ShutdownState::Running as u8),
                connect_started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                channel: RwLock::new(None),
                configuration: RwLock::new(None),
                skin: RwLock::new(None),
                keyboard: KeyboardQueue::new(),
                lifetime,
                keep_alive,
            }),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.shared.device
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.shared.shutdown_state()
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionStateListener>) -> ListenerId {
        self.shared.connection.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.connection.remove_listener(id)
    }

    /// Configuration resolved by `connect`, `None` before that.
    pub fn device_configuration(&self) -> Option<Arc<DeviceConfiguration>> {
        self.shared.configuration.read().ok().and_then(|guard| guard.clone())
    }

    /// Device frame artwork, `None` when the device has none.
    pub fn skin_definition(&self) -> Option<SkinDefinition> {
        self.shared.skin.read().ok().and_then(|guard| guard.clone())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    /// Resolves the device configuration and opens the channel.
    ///
    /// Failures are not returned: the session moves to `Disconnected` and
    /// listeners hear about it.  Calling `connect` a second time does
    /// nothing.
    pub async fn connect(&self) {
        let shared = &self.shared;
        if shared.connect_started.swap(true, Ordering::SeqCst) {
            debug!("{}: connect called more than once", shared.device.display_name());
            return;
        }

        let device = shared.device.clone();
        let source = Arc::clone(&shared.source);
        let resolved = tokio::task::spawn_blocking(move || {
            let configuration = source.load(&device)?;
            let skin = source.load_skin(&configuration);
            Ok::<_, crate::application::device::DeviceConfigError>((configuration, skin))
        })
        .await;

        let (configuration, skin) = match resolved {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                warn!("unable to resolve configuration of {}: {e}", shared.device.display_name());
                shared.set_connection_state(ConnectionState::Disconnected);
                return;
            }
            Err(e) => {
                error!("configuration task of {} failed: {e}", shared.device.display_name());
                shared.set_connection_state(ConnectionState::Disconnected);
                return;
            }
        };

        if shared.lifetime.is_cancelled() {
            return;
        }

        let configuration = Arc::new(configuration);
        if let Ok(mut guard) = shared.configuration.write() {
            *guard = Some(Arc::clone(&configuration));
        }
        if let Ok(mut guard) = shared.skin.write() {
            *guard = skin;
        }

        shared.open_channel(&configuration);
    }

    /// Asks the device to shut down.  Sends the request at most once, now if
    /// connected, otherwise after the next successful heartbeat.
    pub fn shutdown(&self) {
        let requested = self
            .shared
            .shutdown
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::ShutdownRequested as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if requested && self.is_connected() {
            let shared = Arc::clone(&self.shared);
            self.shared.runtime.spawn(async move { shared.send_shutdown().await });
        }
    }

    /// Tears the session down: stops the heartbeat, answers queued keyboard
    /// events with `Cancelled` and closes the channel, failing every
    /// outstanding call and stream.
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.lifetime.cancel();
        let flushed = shared.keyboard.flush("session disposed");
        if flushed > 0 {
            debug!("{}: dropped {flushed} queued keyboard events", shared.device.display_name());
        }
        let channel = shared.channel.write().ok().and_then(|mut guard| guard.take());
        if let Some(channel) = channel {
            channel.shutdown();
        }
        shared.set_connection_state(ConnectionState::Disconnected);
    }

    // ── Input ─────────────────────────────────────────────────────────────

    /// Sends a keyboard event after every earlier one has been delivered.
    /// The receiver resolves with the outcome of this event's call.
    pub fn send_key(&self, event: KeyboardEvent) -> oneshot::Receiver<KeyResult> {
        let (responder, receiver) = oneshot::channel();
        if let Some(envelope) = self.shared.keyboard.submit(KeyEnvelope { event, responder }) {
            let shared = Arc::clone(&self.shared);
            self.shared.runtime.spawn(shared.drain_keyboard(envelope));
        }
        receiver
    }

    pub fn send_mouse(&self, event: MouseEvent) {
        self.fire_and_forget(RpcRequest::SendMouse(event));
    }

    pub fn send_touch(&self, event: TouchEvent) {
        self.fire_and_forget(RpcRequest::SendTouch(event));
    }

    pub fn inject_wheel(&self, event: WheelEvent) {
        self.fire_and_forget(RpcRequest::InjectWheel(event));
    }

    fn fire_and_forget(&self, request: RpcRequest) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            // Failures are already logged by the wrapper.
            let _ = shared.unary::<()>(request, CallOptions::default()).await;
        });
    }

    // ── Unary calls ───────────────────────────────────────────────────────

    pub async fn set_clipboard(&self, text: impl Into<String>) -> Result<(), RpcStatus> {
        let request = RpcRequest::SetClipboard(ClipData { text: text.into() });
        self.shared.unary(request, CallOptions::default()).await
    }

    pub async fn set_display_mode(&self, mode: DisplayModeValue) -> Result<(), RpcStatus> {
        self.call(RpcRequest::SetDisplayMode(mode)).await
    }

    pub async fn get_physical_model(&self, kind: PhysicalType) -> Result<PhysicalModelValue, RpcStatus> {
        self.call(RpcRequest::GetPhysicalModel(kind)).await
    }

    pub async fn set_physical_model(&self, value: PhysicalModelValue) -> Result<(), RpcStatus> {
        self.call(RpcRequest::SetPhysicalModel(value)).await
    }

    pub async fn get_screenshot(&self, format: ImageFormat) -> Result<ImageMessage, RpcStatus> {
        self.call(RpcRequest::GetScreenshot(format)).await
    }

    pub async fn get_status(&self) -> Result<EmulatorStatus, RpcStatus> {
        self.call(RpcRequest::GetStatus).await
    }

    pub async fn get_vm_state(&self) -> Result<VmRunState, RpcStatus> {
        self.call(RpcRequest::GetVmState).await
    }

    pub async fn set_vm_state(&self, state: RunState) -> Result<(), RpcStatus> {
        self.call(RpcRequest::SetVmState(VmRunState { state })).await
    }

    pub async fn get_display_configurations(&self) -> Result<DisplayConfigurations, RpcStatus> {
        self.call(RpcRequest::GetDisplayConfigurations).await
    }

    pub async fn set_display_configurations(
        &self,
        configurations: DisplayConfigurations,
    ) -> Result<DisplayConfigurations, RpcStatus> {
        self.call(RpcRequest::SetDisplayConfigurations(configurations)).await
    }

    pub async fn rotate_virtual_scene_camera(&self, rotation: RotationRadian) -> Result<(), RpcStatus> {
        self.call(RpcRequest::RotateVirtualSceneCamera(rotation)).await
    }

    pub async fn set_virtual_scene_camera_velocity(&self, velocity: Velocity) -> Result<(), RpcStatus> {
        self.call(RpcRequest::SetVirtualSceneCameraVelocity(velocity)).await
    }

    pub async fn list_snapshots(&self) -> Result<SnapshotList, RpcStatus> {
        self.call(RpcRequest::ListSnapshots).await
    }

    pub async fn load_snapshot(&self, snapshot_id: impl Into<String>) -> Result<SnapshotPackage, RpcStatus> {
        self.call(RpcRequest::LoadSnapshot(snapshot_id.into())).await
    }

    pub async fn save_snapshot(&self, snapshot_id: impl Into<String>) -> Result<SnapshotPackage, RpcStatus> {
        self.call(RpcRequest::SaveSnapshot(snapshot_id.into())).await
    }

    pub async fn delete_snapshot(&self, snapshot_id: impl Into<String>) -> Result<SnapshotPackage, RpcStatus> {
        self.call(RpcRequest::DeleteSnapshot(snapshot_id.into())).await
    }

    pub async fn show_extended_controls(&self) -> Result<(), RpcStatus> {
        self.call(RpcRequest::ShowExtendedControls).await
    }

    pub async fn close_extended_controls(&self) -> Result<(), RpcStatus> {
        self.call(RpcRequest::CloseExtendedControls).await
    }

    pub async fn set_ui_theme(&self, style: ThemingStyle) -> Result<(), RpcStatus> {
        self.call(RpcRequest::SetUiTheme(style)).await
    }

    async fn call<T: FromResponse>(&self, request: RpcRequest) -> Result<T, RpcStatus> {
        self.shared.unary(request, CallOptions::default()).await
    }

    // ── Streaming calls ───────────────────────────────────────────────────

    /// Streams frames of `format.display` shaped as `format` asks.
    ///
    /// # Errors
    ///
    /// Returns [`RpcStatus`] if the call cannot be started.
    pub fn stream_screenshot(&self, format: ImageFormat) -> Result<Subscription<ImageMessage>, RpcStatus> {
        self.shared.server_streaming(RpcRequest::StreamScreenshot(format))
    }

    /// # Errors
    ///
    /// Returns [`RpcStatus`] if the call cannot be started.
    pub fn stream_clipboard(&self) -> Result<Subscription<ClipData>, RpcStatus> {
        self.shared.server_streaming(RpcRequest::StreamClipboard)
    }

    /// # Errors
    ///
    /// Returns [`RpcStatus`] if the call cannot be started.
    pub fn stream_notification(&self) -> Result<Subscription<Notification>, RpcStatus> {
        self.shared.server_streaming(RpcRequest::StreamNotification)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("device", &self.shared.device.serial_number())
            .field("state", &self.connection_state())
            .finish()
    }
}

impl SessionShared {
    fn name(&self) -> String {
        self.device.display_name()
    }

    fn set_connection_state(&self, state: ConnectionState) {
        if self.connection.set(state) {
            info!("{}: {:?}", self.name(), state);
        }
    }

    fn shutdown_state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.shutdown.load(Ordering::SeqCst))
    }

    fn channel(&self) -> Option<Arc<dyn RpcChannel>> {
        self.channel.read().ok().and_then(|guard| guard.clone())
    }

    // ── Connection ────────────────────────────────────────────────────────

    fn open_channel(self: &Arc<Self>, configuration: &DeviceConfiguration) {
        self.set_connection_state(ConnectionState::Connecting);

        let endpoint = self.device.endpoint();
        let options = ChannelOptions {
            max_inbound_message_size: configuration.max_inbound_message_size(self.settings.inbound_size_margin),
            compression_enabled: false,
            bearer_token: endpoint.bearer_token.clone(),
        };
        debug!(
            "{}: opening channel to {} (max inbound {} bytes)",
            self.name(),
            endpoint.address(),
            options.max_inbound_message_size
        );

        let channel = match self.factory.open(&endpoint, options) {
            Ok(channel) => channel,
            Err(status) => {
                warn!("{}: unable to open channel to {}: {}", self.name(), endpoint.address(), status);
                self.set_connection_state(ConnectionState::Disconnected);
                return;
            }
        };
        if let Ok(mut guard) = self.channel.write() {
            *guard = Some(Arc::clone(&channel));
        }

        self.spawn_connectivity_watcher(channel);
        self.spawn_keep_alive();
    }

    fn spawn_connectivity_watcher(self: &Arc<Self>, channel: Arc<dyn RpcChannel>) {
        let shared = Arc::clone(self);
        let mut states = channel.watch_state();
        self.runtime.spawn(async move {
            loop {
                let state = *states.borrow_and_update();
                shared.on_channel_state(state);
                if shared.connection.get() == ConnectionState::Disconnected {
                    break;
                }
                tokio::select! {
                    _ = shared.lifetime.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn on_channel_state(&self, state: ChannelState) {
        match state {
            ChannelState::Connecting => self.set_connection_state(ConnectionState::Connecting),
            ChannelState::Shutdown => self.set_connection_state(ConnectionState::Disconnected),
            ChannelState::Idle | ChannelState::Ready | ChannelState::TransientFailure => {}
        }
    }

    fn spawn_keep_alive(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let token = self.keep_alive.clone();
        self.runtime.spawn(async move {
            loop {
                let deadline = if shared.connection.get() == ConnectionState::Connected {
                    shared.settings.connected_deadline
                } else {
                    shared.settings.connecting_deadline
                };
                let heartbeat = shared.unary::<VmRunState>(RpcRequest::GetVmState, CallOptions::with_deadline(deadline));
                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    result = heartbeat => result,
                };

                match result {
                    Ok(_) => {
                        shared.set_connection_state(ConnectionState::Connected);
                        if shared.shutdown_state() == ShutdownState::ShutdownRequested {
                            shared.send_shutdown().await;
                            return;
                        }
                    }
                    Err(status) => {
                        // Heartbeats stop for good after any failure.
                        if status.is_unavailable() || shared.connection.get() != ConnectionState::Connected {
                            shared.set_connection_state(ConnectionState::Disconnected);
                        } else {
                            warn!("{}: heartbeat failed, keep-alive stopped: {status}", shared.name());
                        }
                        return;
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(shared.settings.keep_alive_interval) => {}
                }
            }
        });
    }

    async fn send_shutdown(self: &Arc<Self>) {
        let claimed = self
            .shutdown
            .compare_exchange(
                ShutdownState::ShutdownRequested as u8,
                ShutdownState::ShutdownSent as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !claimed {
            return;
        }
        self.keep_alive.cancel();
        info!("{}: sending shutdown", self.name());
        let request = RpcRequest::SetVmState(VmRunState { state: RunState::Shutdown });
        let _ = self.unary::<()>(request, CallOptions::default()).await;
    }

    async fn drain_keyboard(self: Arc<Self>, first: KeyEnvelope) {
        let mut next = Some(first);
        while let Some(KeyEnvelope { event, responder }) = next {
            let result = self.unary::<()>(RpcRequest::SendKey(event), CallOptions::default()).await;
            let _ = responder.send(result);
            next = self.keyboard.complete();
        }
    }

    // ── Call wrappers ─────────────────────────────────────────────────────

    async fn unary<T: FromResponse>(&self, request: RpcRequest, options: CallOptions) -> Result<T, RpcStatus> {
        let method = request.method();
        self.trace_request(&request);

        let Some(channel) = self.channel() else {
            return Err(RpcStatus::failed_precondition("session is not connected"));
        };
        match channel.unary(request, options).await {
            Ok(response) => {
                if self.should_trace(method) {
                    info!("{} response: {}", method.full_name(), describe_response(&response));
                }
                T::from_response(response).map_err(|other| unexpected_response(method, &other))
            }
            Err(status) => {
                self.on_call_error(method, &status);
                Err(status)
            }
        }
    }

    fn server_streaming<T: FromResponse>(self: &Arc<Self>, request: RpcRequest) -> Result<Subscription<T>, RpcStatus> {
        let method = request.method();
        self.trace_request(&request);

        let Some(channel) = self.channel() else {
            return Err(RpcStatus::failed_precondition("session is not connected"));
        };
        let stream = channel.server_streaming(request).map_err(|status| {
            self.on_call_error(method, &status);
            status
        })?;
        Ok(Subscription {
            method,
            items: stream.items,
            cancel: StreamCancel {
                call: stream.call,
                session: Arc::downgrade(self),
            },
            session: Arc::downgrade(self),
            _item: PhantomData,
        })
    }

    fn on_call_error(&self, method: RpcMethod, status: &RpcStatus) {
        let channel_shut_down = self.channel().map_or(true, |c| c.is_shutdown());
        if !status.is_cancelled() && !channel_shut_down {
            warn!("{} call failed - {}", method.full_name(), status.message);
        }
        if status.is_unavailable() {
            self.set_connection_state(ConnectionState::Disconnected);
        }
    }

    fn should_trace(&self, method: RpcMethod) -> bool {
        let trace = &self.settings.trace;
        trace.grpc_calls && (!method.is_high_volume() || trace.high_volume_grpc_calls)
    }

    fn trace_request(&self, request: &RpcRequest) {
        let method = request.method();
        if self.should_trace(method) {
            info!("{} {}", method.full_name(), describe_request(request));
        }
    }

    fn trace_stream_item(&self, method: RpcMethod, response: &RpcResponse) {
        let frames = method == RpcMethod::StreamScreenshot;
        if self.should_trace(method) && (!frames || self.settings.trace.screenshots) {
            info!("{} item: {}", method.full_name(), describe_response(response));
        }
    }
}

fn describe_request(request: &RpcRequest) -> String {
    match request {
        RpcRequest::SetClipboard(_) => CLIPBOARD_PLACEHOLDER.to_string(),
        other => format!("{other:?}"),
    }
}

fn describe_response(response: &RpcResponse) -> String {
    match response {
        RpcResponse::Clip(_) => CLIPBOARD_PLACEHOLDER.to_string(),
        RpcResponse::Image(image) => format!(
            "image {}x{} rotation {:?} seq {}",
            image.format.width, image.format.height, image.format.rotation, image.seq
        ),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::protocol::status::StatusCode;

    #[test]
    fn test_describe_request_masks_clipboard_text() {
        let request = RpcRequest::SetClipboard(ClipData { text: "hunter2".to_string() });
        assert_eq!(describe_request(&request), "<clipboard contents>");
        assert!(describe_request(&RpcRequest::GetVmState).contains("GetVmState"));
    }

    #[test]
    fn test_describe_response_summarizes_images_and_masks_clipboard() {
        let image = ImageMessage {
            format: ImageFormat { width: 2, height: 3, ..Default::default() },
            image: vec![0; 18],
            seq: 7,
            timestamp_us: 0,
        };
        let text = describe_response(&RpcResponse::Image(image));
        assert!(text.contains("2x3") && text.contains("seq 7"));
        assert!(!text.contains("[0, 0"), "pixel bytes must not be logged");
        assert_eq!(describe_response(&RpcResponse::Clip(ClipData::default())), "<clipboard contents>");
    }

    #[test]
    fn test_from_response_rejects_other_kinds() {
        // Arrange
        let response = RpcResponse::VmRunState(VmRunState { state: RunState::Running });

        // Act
        let as_state = VmRunState::from_response(response.clone());
        let as_empty = <()>::from_response(response);

        // Assert
        assert_eq!(as_state.map(|s| s.state), Ok(RunState::Running));
        assert!(as_empty.is_err());
        let status = unexpected_response(RpcMethod::SendKey, &RpcResponse::Empty);
        assert_eq!(status.code, StatusCode::Internal);
    }

    #[test]
    fn test_default_settings_match_documented_timings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.keep_alive_interval, Duration::from_secs(120));
        assert_eq!(settings.connected_deadline, Duration::from_secs(3));
        assert_eq!(settings.connecting_deadline, Duration::from_secs(15));
        assert_eq!(settings.inbound_size_margin, 100);
    }
}
