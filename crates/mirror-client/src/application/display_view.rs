//! One display of a device: screenshot feed, decoding and hand-off to the UI.
//!
//! # Frame path (for beginners)
//!
//! ```text
//! stream task                  blocking pool             UI thread
//! ───────────                  ─────────────             ─────────
//! validate (FrameValidator)
//! unpack RGB888 → PixelBuffer
//! skin layout cached? ──yes──────────────────────────▶ update_display_image
//!        │ no                                              swap image
//!        └──────────────▶ compute skin layout ───────▶    recycle old buffer
//!                                                          notify FrameSink
//! ```
//!
//! Frames hop between threads through two single-entry slots ("for
//! processing" and "for display").  A newer frame overwrites an older one
//! still in a slot; whoever then finds the slot empty counts a dropped
//! frame.
//!
//! Each screenshot stream gets a generation number.  Requesting a new
//! stream first clears the current generation, cancels the old stream and
//! only then installs the new one, so late results of the old stream are
//! recognised and discarded at every hop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use mirror_core::domain::display::{DisplayModeValue, Rotation, Size};
use mirror_core::protocol::codec::current_timestamp_us;
use mirror_core::protocol::messages::{ImageFormat, ImageMessage, Notification, PixelFormat};
use mirror_core::protocol::status::RpcStatus;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::connection::{ConnectionState, ListenerId};
use crate::application::frame_buffer::{unpack_rgb888, BufferRecycler};
use crate::application::frame_stats::{FrameStats, FrameStatsSnapshot};
use crate::application::frame_stream::{same_aspect_ratio, DecodedFrame, FrameCheck, FrameValidator, Screenshot};
use crate::application::session::{SessionController, StreamCancel, Subscription};
use crate::application::skin::SkinLayoutCache;
use crate::application::ui::{FrameSink, UiDispatcher};

/// Knobs of a display view.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayViewSettings {
    /// Draw the device frame around the display when the device has one.
    pub show_device_frame: bool,
    /// How long the buffer of a superseded frame stays available for reuse.
    pub recycled_buffer_ttl: Duration,
    /// Period of the frame statistics log line; zero disables it.
    pub stats_interval: Duration,
    /// Aspect-ratio change that resets the zoom level.
    pub zoom_reset_tolerance: f64,
    /// Log every received frame.
    pub trace_screenshots: bool,
}

impl Default for DisplayViewSettings {
    fn default() -> Self {
        Self {
            show_device_frame: true,
            recycled_buffer_ttl: Duration::from_millis(2000),
            stats_interval: Duration::ZERO,
            zoom_reset_tolerance: 0.01,
            trace_screenshots: false,
        }
    }
}

/// Zoom level of the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zoom {
    /// Scale the image to fit the viewport.
    Fit,
    Scale(f64),
}

/// Parameters of a screenshot stream.  Identical parameters keep the
/// current stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FeedRequest {
    max_image_size: Size,
    rotation: Rotation,
    display_mode: Option<DisplayModeValue>,
}

struct ActiveFeed {
    request: FeedRequest,
    cancel: StreamCancel,
    task: JoinHandle<()>,
}

struct NotificationFeed {
    cancel: StreamCancel,
    task: JoinHandle<()>,
}

struct ViewShared {
    session: SessionController,
    display_id: u32,
    ui: Arc<dyn UiDispatcher>,
    sink: Arc<dyn FrameSink>,
    settings: DisplayViewSettings,
    runtime: Handle,
    /// Generation of the current screenshot receiver, 0 when there is none.
    generation: AtomicU64,
    next_generation: AtomicU64,
    feed: Mutex<Option<ActiveFeed>>,
    notifications: Mutex<Option<NotificationFeed>>,
    viewport: Mutex<Size>,
    skin_cache: Mutex<Option<Arc<SkinLayoutCache>>>,
    recycler: BufferRecycler,
    stats: FrameStats,
    for_processing: Mutex<Option<DecodedFrame>>,
    for_display: Mutex<Option<Screenshot>>,
    last_screenshot: Mutex<Option<Arc<Screenshot>>>,
    zoom: Mutex<Zoom>,
    received_frame_count: AtomicU64,
    posture: Mutex<Option<u32>>,
    listener: Mutex<Option<ListenerId>>,
    lifetime: CancellationToken,
}

/// View of one device display.  Clones share the same view.
#[derive(Clone)]
pub struct DisplayView {
    shared: Arc<ViewShared>,
}

impl DisplayView {
    /// Creates a view of display `display_id` and starts its feed as soon
    /// as the session is connected and the viewport has a size.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        session: SessionController,
        display_id: u32,
        ui: Arc<dyn UiDispatcher>,
        sink: Arc<dyn FrameSink>,
        settings: DisplayViewSettings,
    ) -> Self {
        let recycler = BufferRecycler::new(settings.recycled_buffer_ttl);
        let shared = Arc::new(ViewShared {
            session,
            display_id,
            ui,
            sink,
            settings,
            runtime: Handle::current(),
            generation: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            feed: Mutex::new(None),
            notifications: Mutex::new(None),
            viewport: Mutex::new(Size::default()),
            skin_cache: Mutex::new(None),
            recycler,
            stats: FrameStats::new(),
            for_processing: Mutex::new(None),
            for_display: Mutex::new(None),
            last_screenshot: Mutex::new(None),
            zoom: Mutex::new(Zoom::Fit),
            received_frame_count: AtomicU64::new(0),
            posture: Mutex::new(None),
            listener: Mutex::new(None),
            lifetime: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&shared);
        let id = shared.session.add_listener(Arc::new(move |state: ConnectionState| {
            if let Some(view) = weak.upgrade() {
                view.on_connection_state(state);
            }
        }));
        if let Ok(mut listener) = shared.listener.lock() {
            *listener = Some(id);
        }
        shared.spawn_stats_logger();

        let view = Self { shared };
        if view.shared.session.is_connected() {
            view.shared.on_connection_state(ConnectionState::Connected);
        }
        view
    }

    pub fn display_id(&self) -> u32 {
        self.shared.display_id
    }

    /// Sets the size of the area the image is shown in, in physical pixels.
    /// A new size requests a stream of matching resolution.
    pub fn set_viewport_size(&self, size: Size) {
        let changed = match self.shared.viewport.lock() {
            Ok(mut viewport) if *viewport != size => {
                *viewport = size;
                true
            }
            _ => false,
        };
        if changed {
            self.shared.request_screenshot_feed();
        }
    }

    /// Requests a stream for the current rotation and display mode.  Keeps
    /// the current stream when nothing changed.  Returns `true` when a
    /// stream is active afterwards.
    pub fn request_screenshot_feed(&self) -> bool {
        self.shared.request_screenshot_feed()
    }

    pub fn zoom(&self) -> Zoom {
        self.shared.zoom.lock().map(|z| *z).unwrap_or(Zoom::Fit)
    }

    pub fn set_zoom(&self, zoom: Zoom) {
        if let Ok(mut current) = self.shared.zoom.lock() {
            *current = zoom;
        }
    }

    pub fn reset_zoom(&self) {
        self.set_zoom(Zoom::Fit);
    }

    /// The image currently displayed.
    pub fn last_screenshot(&self) -> Option<Arc<Screenshot>> {
        self.shared.last_screenshot.lock().ok().and_then(|s| s.clone())
    }

    /// Number of frames that became the displayed image.
    pub fn received_frame_count(&self) -> u64 {
        self.shared.received_frame_count.load(Ordering::SeqCst)
    }

    pub fn frame_stats(&self) -> FrameStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Last posture reported by the device, for foldables.
    pub fn posture(&self) -> Option<u32> {
        self.shared.current_posture()
    }

    /// Cancels the feeds and detaches from the session.
    pub fn dispose(&self) {
        let shared = &self.shared;
        shared.lifetime.cancel();
        shared.cancel_screenshot_feed();
        shared.cancel_notification_feed();
        let listener = shared.listener.lock().ok().and_then(|mut l| l.take());
        if let Some(id) = listener {
            shared.session.remove_listener(id);
        }
    }
}

impl ViewShared {
    fn on_connection_state(self: &Arc<Self>, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                let view = Arc::clone(self);
                self.ui.dispatch(Box::new(move || {
                    view.request_screenshot_feed();
                    view.request_notification_feed();
                }));
            }
            ConnectionState::Disconnected => {
                self.cancel_screenshot_feed();
                self.cancel_notification_feed();
            }
            ConnectionState::NotInitialized | ConnectionState::Connecting => {}
        }
    }

    fn spawn_stats_logger(self: &Arc<Self>) {
        let interval = self.settings.stats_interval;
        if interval.is_zero() {
            return;
        }
        let view = Arc::downgrade(self);
        let lifetime = self.lifetime.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = lifetime.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(view) = view.upgrade() else { break };
                info!("display {}: {}", view.display_id, view.stats.snapshot());
            }
        });
    }

    fn skin_cache(&self) -> Arc<SkinLayoutCache> {
        let Ok(mut guard) = self.skin_cache.lock() else {
            return Arc::new(SkinLayoutCache::new(None));
        };
        let cache = guard.get_or_insert_with(|| {
            let skin = self
                .session
                .skin_definition()
                .filter(|_| self.settings.show_device_frame && self.display_id == 0);
            Arc::new(SkinLayoutCache::new(skin))
        });
        Arc::clone(cache)
    }

    // ── Feed management ───────────────────────────────────────────────────

    fn request_screenshot_feed(self: &Arc<Self>) -> bool {
        let last = self.last_screenshot.lock().ok().and_then(|s| s.clone());
        let (rotation, display_mode) = match &last {
            Some(screenshot) => (screenshot.shape.rotation, screenshot.shape.display_mode.as_ref().map(|m| m.id)),
            None => {
                let rotation = self
                    .session
                    .device_configuration()
                    .map_or(Rotation::Deg0, |c| c.initial_rotation);
                (rotation, None)
            }
        };
        self.request_feed_for(rotation, display_mode)
    }

    fn request_feed_for(self: &Arc<Self>, rotation: Rotation, display_mode: Option<DisplayModeValue>) -> bool {
        if !self.session.is_connected() || self.lifetime.is_cancelled() {
            return false;
        }
        let Some(configuration) = self.session.device_configuration() else {
            return false;
        };
        let viewport = self.viewport.lock().map(|v| *v).unwrap_or_default();
        if viewport.is_empty() {
            return false;
        }

        let display_size = display_mode
            .and_then(|id| configuration.display_mode(id))
            .map_or(configuration.display_size, |mode| mode.size());

        // Work in the display's natural orientation.
        let mut max_size = viewport.rotated(rotation);
        if let Some(skin) = self.skin_cache().skin(self.current_posture()) {
            if !skin.frame_size.is_empty() {
                max_size.width = scale_down(max_size.width, skin.display_rect.width, skin.frame_size.width);
                max_size.height = scale_down(max_size.height, skin.display_rect.height, skin.frame_size.height);
            }
        }
        max_size.width = max_size.width.min(display_size.width);
        max_size.height = max_size.height.min(display_size.height);

        let request = FeedRequest {
            max_image_size: max_size.rotated(rotation),
            rotation,
            display_mode,
        };
        let unchanged = self
            .feed
            .lock()
            .map(|feed| feed.as_ref().is_some_and(|f| f.request == request))
            .unwrap_or(false);
        if unchanged {
            return true;
        }

        self.cancel_screenshot_feed();

        let format = ImageFormat {
            format: PixelFormat::Rgb888,
            width: request.max_image_size.width,
            height: request.max_image_size.height,
            display: self.display_id,
            display_mode: display_mode.unwrap_or_default(),
            ..Default::default()
        };
        let subscription = match self.session.stream_screenshot(format) {
            Ok(subscription) => subscription,
            Err(status) => {
                warn!("display {}: unable to request screenshots: {status}", self.display_id);
                return false;
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.generation.store(generation, Ordering::SeqCst);
        debug!(
            "display {}: requested {}x{} screenshots (generation {generation})",
            self.display_id, request.max_image_size.width, request.max_image_size.height
        );

        let receiver = ScreenshotReceiver {
            view: Arc::downgrade(self),
            generation,
            validator: FrameValidator::new(configuration, rotation, display_mode),
        };
        let cancel = subscription.cancel_handle();
        let task = self.runtime.spawn(receiver.run(subscription));
        if let Ok(mut feed) = self.feed.lock() {
            *feed = Some(ActiveFeed { request, cancel, task });
        }
        true
    }

    fn cancel_screenshot_feed(&self) {
        self.generation.store(0, Ordering::SeqCst);
        let feed = self.feed.lock().ok().and_then(|mut f| f.take());
        if let Some(feed) = feed {
            feed.cancel.cancel();
            feed.task.abort();
        }
    }

    fn request_notification_feed(self: &Arc<Self>) {
        self.cancel_notification_feed();
        if !self.session.is_connected() || self.lifetime.is_cancelled() {
            return;
        }
        let subscription = match self.session.stream_notification() {
            Ok(subscription) => subscription,
            Err(status) => {
                warn!("display {}: unable to request notifications: {status}", self.display_id);
                return;
            }
        };
        let cancel = subscription.cancel_handle();
        let task = self.runtime.spawn(receive_notifications(Arc::downgrade(self), subscription));
        if let Ok(mut feed) = self.notifications.lock() {
            *feed = Some(NotificationFeed { cancel, task });
        }
    }

    fn cancel_notification_feed(&self) {
        let feed = self.notifications.lock().ok().and_then(|mut f| f.take());
        if let Some(feed) = feed {
            feed.cancel.cancel();
            feed.task.abort();
        }
    }

    fn on_notification(self: &Arc<Self>, notification: Notification) {
        match &notification {
            Notification::PostureChanged { posture } => {
                let previous = self.posture.lock().ok().and_then(|mut current| current.replace(*posture));
                debug!("display {}: posture {posture}", self.display_id);
                if previous != Some(*posture) {
                    // The device frame may come or go, which changes the image size that fits.
                    let view = Arc::clone(self);
                    self.ui.dispatch(Box::new(move || {
                        view.request_screenshot_feed();
                    }));
                }
            }
            Notification::DisplayConfigurationsChanged(configurations) => {
                info!(
                    "display {}: device now has {} displays",
                    self.display_id,
                    configurations.displays.len()
                );
            }
            Notification::BootCompleted => info!("{} finished booting", self.session.device_id().display_name()),
            Notification::VirtualSceneCameraActive | Notification::VirtualSceneCameraInactive => {
                debug!("display {}: {notification:?}", self.display_id);
            }
        }
    }

    fn current_posture(&self) -> Option<u32> {
        self.posture.lock().ok().and_then(|p| *p)
    }

    fn is_current(&self, generation: u64) -> bool {
        generation != 0 && self.generation.load(Ordering::SeqCst) == generation
    }

    // ── Frames ────────────────────────────────────────────────────────────

    fn on_frame(self: &Arc<Self>, receiver: &mut ScreenshotReceiver, message: ImageMessage) {
        let format = &message.format;
        if self.settings.trace_screenshots {
            let latency_ms = current_timestamp_us().saturating_sub(message.timestamp_us) / 1000;
            info!(
                "Screenshot for display {}: {} {}x{} {:?} {:?} {latency_ms} ms latency",
                format.display, message.seq, format.width, format.height, format.display_mode, format.rotation
            );
        }

        if !self.is_current(receiver.generation) {
            receiver.validator.skip_frame();
            return;
        }

        match receiver.validator.check(&message) {
            FrameCheck::Invalid { reason, lost } => {
                self.stats.record_lost(lost);
                self.stats.record_invalid();
                error!("Inconsistent frame for display {}: {reason}", self.display_id);
            }
            FrameCheck::Stale { rotation, display_mode } => {
                debug!(
                    "display {}: stale frame {} ({rotation:?}, {display_mode:?}), requesting a new feed",
                    self.display_id, message.seq
                );
                let view = Arc::clone(self);
                self.ui.dispatch(Box::new(move || {
                    view.request_feed_for(rotation, Some(display_mode));
                }));
            }
            FrameCheck::Accept { shape, lost } => {
                self.stats.record_lost(lost);
                let size = shape.size();
                let pixels = unpack_rgb888(&message.image, size, self.recycler.take(size));
                let frame = DecodedFrame {
                    shape,
                    pixels,
                    timestamp_us: message.timestamp_us,
                    generation: receiver.generation,
                };
                let cache = self.skin_cache();
                match cache.get_cached(&frame.shape, self.current_posture()) {
                    Some(skin) => self.update_display_image_on_ui_thread(frame.with_skin(skin)),
                    None => self.compute_skin_layout_in_background(frame, cache),
                }
            }
        }
    }

    fn compute_skin_layout_in_background(self: &Arc<Self>, frame: DecodedFrame, cache: Arc<SkinLayoutCache>) {
        let generation = frame.generation;
        if let Ok(mut slot) = self.for_processing.lock() {
            *slot = Some(frame);
        }
        let view = Arc::clone(self);
        self.runtime.spawn_blocking(move || {
            if !view.is_current(generation) {
                return;
            }
            let frame = view.for_processing.lock().ok().and_then(|mut slot| slot.take());
            match frame {
                Some(frame) => {
                    let skin = cache.get(&frame.shape, view.current_posture());
                    view.update_display_image_on_ui_thread(frame.with_skin(skin));
                }
                // A later job already took the newer frame.
                None => view.stats.record_dropped(),
            }
        });
    }

    fn update_display_image_on_ui_thread(self: &Arc<Self>, screenshot: Screenshot) {
        let generation = screenshot.generation;
        if let Ok(mut slot) = self.for_display.lock() {
            *slot = Some(screenshot);
        }
        let view = Arc::clone(self);
        self.ui.dispatch(Box::new(move || {
            if view.is_current(generation) {
                view.update_display_image();
            } else {
                view.stats.record_dropped();
            }
        }));
    }

    /// Runs on the UI thread.
    fn update_display_image(&self) {
        let Some(screenshot) = self.for_display.lock().ok().and_then(|mut slot| slot.take()) else {
            self.stats.record_dropped();
            return;
        };
        let screenshot = Arc::new(screenshot);

        let previous = self
            .last_screenshot
            .lock()
            .ok()
            .and_then(|mut last| last.replace(Arc::clone(&screenshot)));
        if let Some(previous) = previous {
            let (old_size, new_size) = (previous.shape.size(), screenshot.shape.size());
            if old_size == new_size {
                // Only reusable when nobody else holds the old frame.
                if let Ok(previous) = Arc::try_unwrap(previous) {
                    self.recycler.recycle(previous.pixels);
                }
            } else if !same_aspect_ratio(old_size, new_size, self.settings.zoom_reset_tolerance) {
                if let Ok(mut zoom) = self.zoom.lock() {
                    *zoom = Zoom::Fit;
                }
                self.sink.zoom_reset(self.display_id);
            }
        }

        self.received_frame_count.fetch_add(1, Ordering::SeqCst);
        let latency_us = current_timestamp_us().saturating_sub(screenshot.timestamp_us);
        self.stats.record_frame(Duration::from_micros(latency_us));
        self.sink.frame_ready(self.display_id, &screenshot);
    }
}

/// `value` scaled by `numerator / denominator`, rounded down.
fn scale_down(value: u32, numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return value;
    }
    (u64::from(value) * u64::from(numerator) / u64::from(denominator)) as u32
}

/// Consumer of one screenshot stream.
struct ScreenshotReceiver {
    view: Weak<ViewShared>,
    generation: u64,
    validator: FrameValidator,
}

impl ScreenshotReceiver {
    async fn run(mut self, mut subscription: Subscription<ImageMessage>) {
        while let Some(item) = subscription.next().await {
            let Some(view) = self.view.upgrade() else { break };
            match item {
                Ok(message) => view.on_frame(&mut self, message),
                Err(status) => {
                    debug!("display {}: screenshot stream ended: {status}", view.display_id);
                    if is_retryable(&status) {
                        drop(view);
                        self.retry().await;
                    }
                    break;
                }
            }
        }
    }

    /// Requests a fresh stream if this one is still the view's current feed.
    async fn retry(&self) {
        tokio::time::sleep(FEED_RETRY_DELAY).await;
        let Some(view) = self.view.upgrade() else { return };
        if !view.is_current(self.generation) {
            return;
        }
        let generation = self.generation;
        let ui_view = Arc::clone(&view);
        view.ui.dispatch(Box::new(move || {
            if ui_view.is_current(generation) {
                ui_view.cancel_screenshot_feed();
                ui_view.request_screenshot_feed();
            }
        }));
    }
}

/// Delay before a feed that failed is requested again.
const FEED_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A failed stream is worth requesting again unless it was cancelled or the
/// device went away.
fn is_retryable(status: &RpcStatus) -> bool {
    !status.is_cancelled() && !status.is_unavailable()
}

async fn receive_notifications(view: Weak<ViewShared>, mut subscription: Subscription<Notification>) {
    while let Some(item) = subscription.next().await {
        let Some(shared) = view.upgrade() else { break };
        match item {
            Ok(notification) => shared.on_notification(notification),
            Err(status) => {
                debug!("display {}: notification stream ended: {status}", shared.display_id);
                drop(shared);
                if is_retryable(&status) {
                    tokio::time::sleep(FEED_RETRY_DELAY).await;
                    if let Some(shared) = view.upgrade().filter(|v| !v.lifetime.is_cancelled()) {
                        let ui_view = Arc::clone(&shared);
                        shared.ui.dispatch(Box::new(move || ui_view.request_notification_feed()));
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_down_leaves_room_for_frame() {
        assert_eq!(scale_down(1300, 1080, 1200), 1170);
        assert_eq!(scale_down(100, 1, 0), 100);
    }

    #[test]
    fn test_default_settings_recycle_for_two_seconds() {
        let settings = DisplayViewSettings::default();
        assert_eq!(settings.recycled_buffer_ttl, Duration::from_millis(2000));
        assert!(settings.stats_interval.is_zero());
        assert_eq!(settings.zoom_reset_tolerance, 0.01);
    }

    #[test]
    fn test_only_cancelled_and_unavailable_streams_are_not_retried() {
        assert!(is_retryable(&RpcStatus::internal("encoder restarted")));
        assert!(!is_retryable(&RpcStatus::cancelled("view disposed")));
        assert!(!is_retryable(&RpcStatus::unavailable("socket closed")));
    }
}
