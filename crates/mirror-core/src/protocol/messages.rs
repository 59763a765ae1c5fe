//! RPC message types exchanged with the device controller service.
//!
//! Every call is a [`RpcRequest`] answered by one (unary) or many
//! (server-streaming) [`RpcResponse`] values.  Payloads are plain serde
//! structs; the codec wraps them in binary frames.

use serde::{Deserialize, Serialize};

use crate::domain::display::{DisplayModeValue, Rect, Rotation};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the frame header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Service name prefixed to every method name in logs.
pub const SERVICE_NAME: &str = "mirror.DeviceController";

/// Bytes per pixel of [`PixelFormat::Rgb888`] image payloads.
pub const RGB888_BYTES_PER_PIXEL: usize = 3;

// ── Methods ───────────────────────────────────────────────────────────────────

/// Every RPC method this client calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    SetClipboard,
    StreamClipboard,
    SetDisplayMode,
    SendKey,
    SendMouse,
    SendTouch,
    InjectWheel,
    StreamNotification,
    GetPhysicalModel,
    SetPhysicalModel,
    GetScreenshot,
    StreamScreenshot,
    GetStatus,
    GetVmState,
    SetVmState,
    GetDisplayConfigurations,
    SetDisplayConfigurations,
    RotateVirtualSceneCamera,
    SetVirtualSceneCameraVelocity,
    ListSnapshots,
    LoadSnapshot,
    SaveSnapshot,
    DeleteSnapshot,
    ShowExtendedControls,
    CloseExtendedControls,
    SetUiTheme,
}

impl RpcMethod {
    /// Short method name as it appears on the wire.
    pub fn name(self) -> &'static str {
        match self {
            RpcMethod::SetClipboard => "setClipboard",
            RpcMethod::StreamClipboard => "streamClipboard",
            RpcMethod::SetDisplayMode => "setDisplayMode",
            RpcMethod::SendKey => "sendKey",
            RpcMethod::SendMouse => "sendMouse",
            RpcMethod::SendTouch => "sendTouch",
            RpcMethod::InjectWheel => "injectWheel",
            RpcMethod::StreamNotification => "streamNotification",
            RpcMethod::GetPhysicalModel => "getPhysicalModel",
            RpcMethod::SetPhysicalModel => "setPhysicalModel",
            RpcMethod::GetScreenshot => "getScreenshot",
            RpcMethod::StreamScreenshot => "streamScreenshot",
            RpcMethod::GetStatus => "getStatus",
            RpcMethod::GetVmState => "getVmState",
            RpcMethod::SetVmState => "setVmState",
            RpcMethod::GetDisplayConfigurations => "getDisplayConfigurations",
            RpcMethod::SetDisplayConfigurations => "setDisplayConfigurations",
            RpcMethod::RotateVirtualSceneCamera => "rotateVirtualSceneCamera",
            RpcMethod::SetVirtualSceneCameraVelocity => "setVirtualSceneCameraVelocity",
            RpcMethod::ListSnapshots => "listSnapshots",
            RpcMethod::LoadSnapshot => "loadSnapshot",
            RpcMethod::SaveSnapshot => "saveSnapshot",
            RpcMethod::DeleteSnapshot => "deleteSnapshot",
            RpcMethod::ShowExtendedControls => "showExtendedControls",
            RpcMethod::CloseExtendedControls => "closeExtendedControls",
            RpcMethod::SetUiTheme => "setUiTheme",
        }
    }

    /// `service/method`, used in logs.
    pub fn full_name(self) -> String {
        format!("{SERVICE_NAME}/{}", self.name())
    }

    /// Input calls issued at pointer-motion rates.  Their trace logging has
    /// a separate switch.
    pub fn is_high_volume(self) -> bool {
        matches!(self, RpcMethod::SendMouse | RpcMethod::SendTouch | RpcMethod::InjectWheel)
    }

    /// `true` for calls answered by a stream of responses.
    pub fn is_server_streaming(self) -> bool {
        matches!(
            self,
            RpcMethod::StreamClipboard | RpcMethod::StreamNotification | RpcMethod::StreamScreenshot
        )
    }
}

// ── Images ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Rgb888,
    Rgba8888,
}

/// Shape of an image, sent with screenshot requests and with every frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageFormat {
    pub format: PixelFormat,
    pub rotation: Rotation,
    /// Requested (or actual) image width.  Zero means "device resolution".
    pub width: u32,
    pub height: u32,
    pub display: u32,
    pub display_mode: DisplayModeValue,
    /// Visible part of the display while the device is folded, in image
    /// coordinates of the unrotated display.  Set on frames only.
    pub folded_display: Option<Rect>,
}

/// One screenshot frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageMessage {
    pub format: ImageFormat,
    /// Packed pixel data, `width × height × 3` bytes for RGB888.
    pub image: Vec<u8>,
    /// Frame sequence number, increasing by one per frame produced.
    pub seq: u32,
    /// Device-side capture time in microseconds since the epoch.
    pub timestamp_us: u64,
}

// ── Input ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
    #[default]
    KeyPress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyCodeType {
    #[default]
    Usb,
    Evdev,
    Xkb,
    Win,
    Mac,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyboardEvent {
    pub code_type: KeyCodeType,
    pub event_type: KeyEventType,
    pub key_code: i32,
    /// DOM-style key name, e.g. `"Enter"` or `"a"`.
    pub key: String,
    /// Text to type; when set the other fields are ignored.
    pub text: String,
}

impl KeyboardEvent {
    pub fn key(event_type: KeyEventType, key: impl Into<String>) -> Self {
        Self { event_type, key: key.into(), ..Default::default() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MouseEvent {
    pub x: i32,
    pub y: i32,
    /// Bit 0 left, bit 1 right, bit 2 middle.
    pub buttons: u32,
    pub display: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WheelEvent {
    pub dx: i32,
    pub dy: i32,
    pub display: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Touch {
    pub x: i32,
    pub y: i32,
    pub identifier: i32,
    /// Zero lifts the finger.
    pub pressure: i32,
    pub touch_major: i32,
    pub touch_minor: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TouchEvent {
    pub touches: Vec<Touch>,
    pub display: u32,
}

// ── Clipboard & notifications ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClipData {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    VirtualSceneCameraActive,
    VirtualSceneCameraInactive,
    DisplayConfigurationsChanged(DisplayConfigurations),
    PostureChanged { posture: u32 },
    BootCompleted,
}

// ── Device state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhysicalType {
    #[default]
    Position,
    Rotation,
    MagneticField,
    Temperature,
    Proximity,
    Light,
    Pressure,
    Humidity,
    HingeAngle0,
    HingeAngle1,
    HingeAngle2,
    Posture,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicalModelValue {
    pub target: PhysicalType,
    pub value: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Unknown,
    Running,
    Restoring,
    Saving,
    Paused,
    InternalError,
    Shutdown,
    Terminate,
    Reset,
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmRunState {
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmulatorStatus {
    pub version: String,
    pub uptime_ms: u64,
    pub booted: bool,
    pub hardware_config: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayConfiguration {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub flags: u32,
    pub display: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayConfigurations {
    pub displays: Vec<DisplayConfiguration>,
    pub user_configurable: u32,
    pub max_displays: u32,
}

// ── Virtual scene camera ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationRadian {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotDetails {
    pub snapshot_id: String,
    pub description: String,
    pub size: u64,
    pub creation_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotList {
    pub snapshots: Vec<SnapshotDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotPackage {
    pub snapshot_id: String,
    pub success: bool,
    pub err: String,
}

// ── UI ────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThemingStyle {
    #[default]
    Light,
    Dark,
    Contrast,
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// A request together with the method it invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    SetClipboard(ClipData),
    StreamClipboard,
    SetDisplayMode(DisplayModeValue),
    SendKey(KeyboardEvent),
    SendMouse(MouseEvent),
    SendTouch(TouchEvent),
    InjectWheel(WheelEvent),
    StreamNotification,
    GetPhysicalModel(PhysicalType),
    SetPhysicalModel(PhysicalModelValue),
    GetScreenshot(ImageFormat),
    StreamScreenshot(ImageFormat),
    GetStatus,
    GetVmState,
    SetVmState(VmRunState),
    GetDisplayConfigurations,
    SetDisplayConfigurations(DisplayConfigurations),
    RotateVirtualSceneCamera(RotationRadian),
    SetVirtualSceneCameraVelocity(Velocity),
    ListSnapshots,
    LoadSnapshot(String),
    SaveSnapshot(String),
    DeleteSnapshot(String),
    ShowExtendedControls,
    CloseExtendedControls,
    SetUiTheme(ThemingStyle),
}

impl RpcRequest {
    pub fn method(&self) -> RpcMethod {
        match self {
            RpcRequest::SetClipboard(_) => RpcMethod::SetClipboard,
            RpcRequest::StreamClipboard => RpcMethod::StreamClipboard,
            RpcRequest::SetDisplayMode(_) => RpcMethod::SetDisplayMode,
            RpcRequest::SendKey(_) => RpcMethod::SendKey,
            RpcRequest::SendMouse(_) => RpcMethod::SendMouse,
            RpcRequest::SendTouch(_) => RpcMethod::SendTouch,
            RpcRequest::InjectWheel(_) => RpcMethod::InjectWheel,
            RpcRequest::StreamNotification => RpcMethod::StreamNotification,
            RpcRequest::GetPhysicalModel(_) => RpcMethod::GetPhysicalModel,
            RpcRequest::SetPhysicalModel(_) => RpcMethod::SetPhysicalModel,
            RpcRequest::GetScreenshot(_) => RpcMethod::GetScreenshot,
            RpcRequest::StreamScreenshot(_) => RpcMethod::StreamScreenshot,
            RpcRequest::GetStatus => RpcMethod::GetStatus,
            RpcRequest::GetVmState => RpcMethod::GetVmState,
            RpcRequest::SetVmState(_) => RpcMethod::SetVmState,
            RpcRequest::GetDisplayConfigurations => RpcMethod::GetDisplayConfigurations,
            RpcRequest::SetDisplayConfigurations(_) => RpcMethod::SetDisplayConfigurations,
            RpcRequest::RotateVirtualSceneCamera(_) => RpcMethod::RotateVirtualSceneCamera,
            RpcRequest::SetVirtualSceneCameraVelocity(_) => RpcMethod::SetVirtualSceneCameraVelocity,
            RpcRequest::ListSnapshots => RpcMethod::ListSnapshots,
            RpcRequest::LoadSnapshot(_) => RpcMethod::LoadSnapshot,
            RpcRequest::SaveSnapshot(_) => RpcMethod::SaveSnapshot,
            RpcRequest::DeleteSnapshot(_) => RpcMethod::DeleteSnapshot,
            RpcRequest::ShowExtendedControls => RpcMethod::ShowExtendedControls,
            RpcRequest::CloseExtendedControls => RpcMethod::CloseExtendedControls,
            RpcRequest::SetUiTheme(_) => RpcMethod::SetUiTheme,
        }
    }
}

/// A response or stream item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Empty,
    Image(ImageMessage),
    Clip(ClipData),
    Notification(Notification),
    PhysicalModel(PhysicalModelValue),
    Status(EmulatorStatus),
    VmRunState(VmRunState),
    DisplayConfigurations(DisplayConfigurations),
    SnapshotList(SnapshotList),
    SnapshotPackage(SnapshotPackage),
}

impl RpcResponse {
    /// Variant name, used when a response has an unexpected type.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcResponse::Empty => "Empty",
            RpcResponse::Image(_) => "Image",
            RpcResponse::Clip(_) => "Clip",
            RpcResponse::Notification(_) => "Notification",
            RpcResponse::PhysicalModel(_) => "PhysicalModel",
            RpcResponse::Status(_) => "Status",
            RpcResponse::VmRunState(_) => "VmRunState",
            RpcResponse::DisplayConfigurations(_) => "DisplayConfigurations",
            RpcResponse::SnapshotList(_) => "SnapshotList",
            RpcResponse::SnapshotPackage(_) => "SnapshotPackage",
        }
    }
}

/// Metadata sent once at the start of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// `"Bearer <token>"` when the device requires a token.
    pub authorization: Option<String>,
    /// Largest frame the client will accept.
    pub max_inbound_message_size: u32,
    pub compression_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_includes_service() {
        assert_eq!(RpcMethod::SendKey.full_name(), "mirror.DeviceController/sendKey");
    }

    #[test]
    fn test_only_pointer_input_is_high_volume() {
        assert!(RpcMethod::SendMouse.is_high_volume());
        assert!(RpcMethod::SendTouch.is_high_volume());
        assert!(RpcMethod::InjectWheel.is_high_volume());
        assert!(!RpcMethod::SendKey.is_high_volume());
        assert!(!RpcMethod::StreamScreenshot.is_high_volume());
    }

    #[test]
    fn test_request_method_matches_variant() {
        assert_eq!(RpcRequest::GetVmState.method(), RpcMethod::GetVmState);
        assert_eq!(
            RpcRequest::StreamScreenshot(ImageFormat::default()).method(),
            RpcMethod::StreamScreenshot
        );
        assert!(RpcMethod::StreamScreenshot.is_server_streaming());
        assert!(!RpcMethod::GetScreenshot.is_server_streaming());
    }
}
