//! Display geometry shared by the session, the frame pipeline and the layout
//! optimizer.
//!
//! Everything here is plain data: sizes, rectangles, rotation quadrants, the
//! resizable display modes a device advertises, its foldable postures, and the
//! [`DisplayShape`] that describes one received frame.
//!
//! # Text encodings (for beginners)
//!
//! Device configuration files describe display modes and postures as compact
//! strings.  The parsers in this module turn them into typed values:
//!
//! ```text
//! hw.resizable.configs = phone-0-1080-2340-420, tablet-2-1920-1200-240
//!                        └name┘ │ └─w─┘ └─h┘ └dpi┘
//!                               id
//!
//! hw.sensor.hinge_angles_posture_definitions = 0-30, 30-150, 150-180
//! hw.sensor.posture_list                     = 1, 2, 3
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing display mode and posture descriptors.
#[derive(Debug, Error, PartialEq)]
pub enum DisplayModeError {
    /// A display mode entry does not have the `name-id-width-height-density` shape.
    #[error("malformed display mode descriptor: {0:?}")]
    MalformedMode(String),

    /// The numeric display mode identifier is not a known value.
    #[error("unknown display mode id: {0}")]
    UnknownModeId(u32),

    /// A posture range entry does not have the `min-max` shape.
    #[error("malformed posture range: {0:?}")]
    MalformedPosture(String),

    /// The posture range list and the posture id list have different lengths.
    #[error("posture lists differ in length: {ranges} ranges, {postures} postures")]
    PostureCountMismatch { ranges: usize, postures: usize },
}

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns the size with width and height exchanged.
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Returns the size as it appears after rotating by `rotation`.
    pub fn rotated(&self, rotation: Rotation) -> Self {
        if rotation.is_odd() {
            self.transposed()
        } else {
            *self
        }
    }

    /// Width divided by height.  Returns 0.0 for an empty size.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }

    /// Number of pixels covered by this size.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Scales both dimensions by `factor`, rounding to the nearest pixel.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            (f64::from(self.width) * factor).round() as u32,
            (f64::from(self.height) * factor).round() as u32,
        )
    }
}

/// An axis-aligned rectangle.  `x`/`y` may be negative when the rectangle is
/// expressed relative to another origin (e.g. a skin frame around a display).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// A rectangle of `size` anchored at the origin.
    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// Rotates the rectangle by `rotation` inside a container of `container` size
    /// (the container size is given in the unrotated orientation).
    pub fn rotated_in(&self, container: Size, rotation: Rotation) -> Self {
        let cw = container.width as i32;
        let ch = container.height as i32;
        match rotation {
            Rotation::Deg0 => *self,
            Rotation::Deg90 => Self::new(self.y, cw - self.right(), self.height, self.width),
            Rotation::Deg180 => Self::new(cw - self.right(), ch - self.bottom(), self.width, self.height),
            Rotation::Deg270 => Self::new(ch - self.bottom(), self.x, self.height, self.width),
        }
    }
}

// ── Rotation ──────────────────────────────────────────────────────────────────

/// Display rotation expressed in counter-clockwise quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Rotation {
    #[default]
    Deg0 = 0,
    Deg90 = 1,
    Deg180 = 2,
    Deg270 = 3,
}

impl Rotation {
    /// Converts any number of quarter turns (negative values allowed) into a rotation.
    pub fn from_quadrants(quadrants: i32) -> Self {
        match quadrants.rem_euclid(4) {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub fn quadrants(self) -> u8 {
        self as u8
    }

    /// `true` for 90° and 270°, i.e. whenever width and height trade places.
    pub fn is_odd(self) -> bool {
        self.quadrants() % 2 == 1
    }

    /// Rotation that undoes this one.
    pub fn inverse(self) -> Self {
        Self::from_quadrants(-i32::from(self.quadrants()))
    }

    /// Composes two rotations.
    pub fn plus(self, other: Rotation) -> Self {
        Self::from_quadrants(i32::from(self.quadrants()) + i32::from(other.quadrants()))
    }

    /// Maps an orientation name from a device configuration file.
    ///
    /// `"landscape"` (any case) is a quarter turn; anything else is portrait.
    pub fn from_orientation_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("landscape") {
            Rotation::Deg90
        } else {
            Rotation::Deg0
        }
    }
}

// ── Display modes ─────────────────────────────────────────────────────────────

/// Identifier of a resizable display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum DisplayModeValue {
    #[default]
    Phone = 0,
    Foldable = 1,
    Tablet = 2,
    Desktop = 3,
}

impl DisplayModeValue {
    pub fn id(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for DisplayModeValue {
    type Error = DisplayModeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DisplayModeValue::Phone),
            1 => Ok(DisplayModeValue::Foldable),
            2 => Ok(DisplayModeValue::Tablet),
            3 => Ok(DisplayModeValue::Desktop),
            other => Err(DisplayModeError::UnknownModeId(other)),
        }
    }
}

/// One resizable display mode advertised by the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    pub name: String,
    pub id: DisplayModeValue,
    pub width: u32,
    pub height: u32,
    pub density: u32,
}

impl DisplayMode {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Parses a single `name-id-width-height-density` descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DisplayModeError::MalformedMode`] if the descriptor does not
    /// have five dash-separated fields with numeric tails, and
    /// [`DisplayModeError::UnknownModeId`] for an unrecognised id.
    pub fn parse(descriptor: &str) -> Result<Self, DisplayModeError> {
        let descriptor = descriptor.trim();
        let malformed = || DisplayModeError::MalformedMode(descriptor.to_string());

        // Split from the right so that the name is whatever remains.
        let mut parts = descriptor.rsplitn(5, '-');
        let density = parts.next().and_then(|p| p.parse::<u32>().ok()).ok_or_else(malformed)?;
        let height = parts.next().and_then(|p| p.parse::<u32>().ok()).ok_or_else(malformed)?;
        let width = parts.next().and_then(|p| p.parse::<u32>().ok()).ok_or_else(malformed)?;
        let id = parts.next().and_then(|p| p.parse::<u32>().ok()).ok_or_else(malformed)?;
        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
        if width == 0 || height == 0 {
            return Err(malformed());
        }

        Ok(Self {
            name: name.to_string(),
            id: DisplayModeValue::try_from(id)?,
            width,
            height,
            density,
        })
    }
}

/// Parses a comma-separated list of display mode descriptors.  Empty input
/// yields an empty list.
///
/// # Errors
///
/// Returns the first [`DisplayModeError`] encountered.
pub fn parse_display_modes(list: &str) -> Result<Vec<DisplayMode>, DisplayModeError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DisplayMode::parse)
        .collect()
}

// ── Postures ──────────────────────────────────────────────────────────────────

/// Hinge angle interval associated with one foldable posture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureRange {
    pub posture: u32,
    pub min_angle: f64,
    pub max_angle: f64,
}

impl PostureRange {
    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min_angle && angle <= self.max_angle
    }
}

/// Builds posture ranges from a comma-separated `min-max` list and the
/// matching comma-separated posture id list.
///
/// # Errors
///
/// Returns [`DisplayModeError::MalformedPosture`] for an unparsable entry and
/// [`DisplayModeError::PostureCountMismatch`] when the lists differ in length.
pub fn parse_posture_ranges(ranges: &str, postures: &str) -> Result<Vec<PostureRange>, DisplayModeError> {
    let parsed_ranges = ranges
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let malformed = || DisplayModeError::MalformedPosture(entry.to_string());
            let (min, max) = entry.split_once('-').ok_or_else(malformed)?;
            let min = min.trim().parse::<f64>().map_err(|_| malformed())?;
            let max = max.trim().parse::<f64>().map_err(|_| malformed())?;
            Ok((min, max))
        })
        .collect::<Result<Vec<_>, DisplayModeError>>()?;

    let posture_ids = postures
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|p| p.parse::<u32>().map_err(|_| DisplayModeError::MalformedPosture(p.to_string())))
        .collect::<Result<Vec<_>, DisplayModeError>>()?;

    if parsed_ranges.len() != posture_ids.len() {
        return Err(DisplayModeError::PostureCountMismatch {
            ranges: parsed_ranges.len(),
            postures: posture_ids.len(),
        });
    }

    Ok(posture_ids
        .into_iter()
        .zip(parsed_ranges)
        .map(|(posture, (min_angle, max_angle))| PostureRange { posture, min_angle, max_angle })
        .collect())
}

// ── Frame shape ───────────────────────────────────────────────────────────────

/// Shape of one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayShape {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Part of the image that shows the active display (e.g. a folded screen).
    pub active_region: Option<Rect>,
    pub display_mode: Option<DisplayMode>,
    pub frame_number: u32,
}

/// Everything about a [`DisplayShape`] except its frame number.  Two frames
/// with the same key share the same skin layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    pub size: Size,
    pub rotation: Rotation,
    pub active_region: Option<Rect>,
    pub display_mode: Option<DisplayModeValue>,
}

impl DisplayShape {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn geometry_key(&self) -> ShapeKey {
        ShapeKey {
            size: self.size(),
            rotation: self.rotation,
            active_region: self.active_region,
            display_mode: self.display_mode.as_ref().map(|m| m.id),
        }
    }
}

/// Checks that an image of `image` size shown at `rotation` has the
/// `expected` aspect ratio of the unrotated display.
///
/// The tolerance is one pixel's worth of rounding in each dimension:
/// `1/width + 1/height` of the image.
pub fn aspect_ratio_matches(image: Size, rotation: Rotation, expected: f64) -> bool {
    if image.is_empty() || expected <= 0.0 {
        return false;
    }
    let upright = image.rotated(rotation);
    let tolerance = 1.0 / f64::from(image.width) + 1.0 / f64::from(image.height);
    (upright.aspect_ratio() / expected - 1.0).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_from_quadrants_wraps_negative_values() {
        assert_eq!(Rotation::from_quadrants(-1), Rotation::Deg270);
        assert_eq!(Rotation::from_quadrants(5), Rotation::Deg90);
        assert_eq!(Rotation::Deg90.inverse(), Rotation::Deg270);
        assert_eq!(Rotation::Deg270.plus(Rotation::Deg180), Rotation::Deg90);
    }

    #[test]
    fn test_orientation_name_landscape_is_quarter_turn() {
        assert_eq!(Rotation::from_orientation_name("Landscape"), Rotation::Deg90);
        assert_eq!(Rotation::from_orientation_name("portrait"), Rotation::Deg0);
    }

    #[test]
    fn test_display_mode_parse_accepts_descriptor() {
        // Act
        let mode = DisplayMode::parse(" tablet-2-1920-1200-240 ").expect("valid descriptor");

        // Assert
        assert_eq!(mode.name, "tablet");
        assert_eq!(mode.id, DisplayModeValue::Tablet);
        assert_eq!(mode.size(), Size::new(1920, 1200));
        assert_eq!(mode.density, 240);
    }

    #[test]
    fn test_display_mode_parse_rejects_short_descriptor() {
        let result = DisplayMode::parse("phone-0-1080");
        assert!(matches!(result, Err(DisplayModeError::MalformedMode(_))));
    }

    #[test]
    fn test_display_mode_parse_rejects_unknown_id() {
        assert_eq!(
            DisplayMode::parse("weird-9-100-100-160"),
            Err(DisplayModeError::UnknownModeId(9))
        );
    }

    #[test]
    fn test_parse_display_modes_reads_comma_separated_list() {
        let modes = parse_display_modes("phone-0-1080-2340-420, foldable-1-1768-2208-420,").unwrap();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[1].id, DisplayModeValue::Foldable);
        assert!(parse_display_modes("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_posture_ranges_zips_ranges_with_ids() {
        // Act
        let postures = parse_posture_ranges("0-30, 30-150, 150-180", "1, 2, 3").unwrap();

        // Assert
        assert_eq!(postures.len(), 3);
        assert_eq!(postures[1].posture, 2);
        assert!(postures[1].contains(90.0));
        assert!(!postures[0].contains(31.0));
    }

    #[test]
    fn test_parse_posture_ranges_rejects_length_mismatch() {
        let result = parse_posture_ranges("0-30, 30-180", "1");
        assert_eq!(
            result,
            Err(DisplayModeError::PostureCountMismatch { ranges: 2, postures: 1 })
        );
    }

    #[test]
    fn test_rect_rotated_by_quarter_turn_stays_inside_container() {
        // Arrange: a 10x20 rect at the top-left of a 100x200 container.
        let rect = Rect::new(0, 0, 10, 20);

        // Act
        let rotated = rect.rotated_in(Size::new(100, 200), Rotation::Deg90);

        // Assert: counter-clockwise turn moves the top-left corner to the bottom-left.
        assert_eq!(rotated, Rect::new(0, 90, 20, 10));
    }

    #[test]
    fn test_aspect_ratio_matches_swaps_for_odd_rotation() {
        // A 2340x1080 landscape image of a 1080x2340 portrait display.
        assert!(aspect_ratio_matches(Size::new(2340, 1080), Rotation::Deg90, 1080.0 / 2340.0));
        assert!(!aspect_ratio_matches(Size::new(2340, 1080), Rotation::Deg0, 1080.0 / 2340.0));
    }

    #[test]
    fn test_aspect_ratio_matches_tolerates_one_pixel_rounding() {
        // 541x1170 is 1080x2340 scaled by ~0.5 with one pixel of rounding.
        assert!(aspect_ratio_matches(Size::new(541, 1170), Rotation::Deg0, 1080.0 / 2340.0));
        assert!(!aspect_ratio_matches(Size::new(600, 1170), Rotation::Deg0, 1080.0 / 2340.0));
    }

    #[test]
    fn test_shape_key_ignores_frame_number() {
        let a = DisplayShape {
            width: 100,
            height: 200,
            rotation: Rotation::Deg0,
            active_region: None,
            display_mode: None,
            frame_number: 1,
        };
        let b = DisplayShape { frame_number: 2, ..a.clone() };
        assert_ne!(a, b);
        assert_eq!(a.geometry_key(), b.geometry_key());
    }
}
