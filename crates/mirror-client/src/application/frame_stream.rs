//! Per-frame validation of a screenshot stream.
//!
//! A stream is requested for a rotation (and, on resizable devices, a
//! display mode) the client *assumes* the device has.  The device may have
//! moved on by the time frames arrive, so every frame is checked before it
//! is decoded:
//!
//! ```text
//! zero width or height           → invalid, sequence counter advanced
//! bytes ≠ width × height × 3     → invalid
//! rotation ≠ assumed rotation    → stale, request a new stream
//! mode ≠ assumed mode            → stale, request a new stream
//! mode unknown to the device     → invalid
//! ── accepted: lost = seq - expected, expected = seq + 1 ──
//! aspect ratio ≠ mode's          → invalid
//! ```
//!
//! Stale frames are not errors; they advance the expected sequence number
//! so that they are not later reported as lost.

use std::sync::Arc;

use mirror_core::domain::display::{aspect_ratio_matches, DisplayModeValue, DisplayShape, Rect, Rotation, Size};
use mirror_core::protocol::messages::{ImageMessage, RGB888_BYTES_PER_PIXEL};
use thiserror::Error;

use crate::application::device::DeviceConfiguration;
use crate::application::frame_buffer::PixelBuffer;
use crate::application::skin::SkinLayout;

/// Reason a frame was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidFrame {
    #[error("{} {width}x{height} image", empty_adjective(.width, .height))]
    EmptyImage { width: u32, height: u32 },

    #[error("{width}x{height} image contains {actual} bytes instead of {expected}")]
    PayloadSize {
        width: u32,
        height: u32,
        actual: usize,
        expected: usize,
    },

    #[error("display mode {0:?} is not one of the device's display modes")]
    UnknownDisplayMode(DisplayModeValue),

    #[error(
        "the {image_width}x{image_height} display image has a different aspect ratio than the \
         {display_width}x{display_height} display{}",
        folded_suffix(.folded)
    )]
    AspectRatio {
        image_width: u32,
        image_height: u32,
        display_width: u32,
        display_height: u32,
        folded: bool,
    },
}

fn empty_adjective(width: &u32, height: &u32) -> &'static str {
    if *width == 0 && *height == 0 {
        "empty"
    } else {
        "degenerate"
    }
}

fn folded_suffix(folded: &bool) -> &'static str {
    if *folded {
        " while folded"
    } else {
        ""
    }
}

/// Outcome of [`FrameValidator::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameCheck {
    /// Decode and display the frame.
    Accept { shape: DisplayShape, lost: u32 },
    /// The stream was requested for outdated parameters; request a new one.
    Stale { rotation: Rotation, display_mode: DisplayModeValue },
    /// Drop the frame and log `reason`.
    Invalid { reason: InvalidFrame, lost: u32 },
}

/// Validation state of one screenshot stream.
#[derive(Debug)]
pub struct FrameValidator {
    configuration: Arc<DeviceConfiguration>,
    rotation: Rotation,
    display_mode: Option<DisplayModeValue>,
    expected_frame: Option<u32>,
}

impl FrameValidator {
    /// `display_mode` is the mode assumed when the stream was requested;
    /// `None` adopts whatever mode the first frame reports.
    pub fn new(
        configuration: Arc<DeviceConfiguration>,
        rotation: Rotation,
        display_mode: Option<DisplayModeValue>,
    ) -> Self {
        Self {
            configuration,
            rotation,
            display_mode,
            expected_frame: None,
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn expected_frame(&self) -> Option<u32> {
        self.expected_frame
    }

    /// Accounts for a frame that is skipped without inspection.  Does
    /// nothing before the first accepted frame.
    pub fn skip_frame(&mut self) {
        if let Some(expected) = self.expected_frame.as_mut() {
            *expected = expected.wrapping_add(1);
        }
    }

    pub fn check(&mut self, message: &ImageMessage) -> FrameCheck {
        let format = &message.format;
        let (width, height) = (format.width, format.height);

        if width == 0 || height == 0 {
            self.skip_frame();
            return FrameCheck::Invalid {
                reason: InvalidFrame::EmptyImage { width, height },
                lost: 0,
            };
        }

        let expected_len = width as usize * height as usize * RGB888_BYTES_PER_PIXEL;
        if message.image.len() != expected_len {
            return FrameCheck::Invalid {
                reason: InvalidFrame::PayloadSize {
                    width,
                    height,
                    actual: message.image.len(),
                    expected: expected_len,
                },
                lost: 0,
            };
        }

        if format.rotation != self.rotation {
            self.skip_frame();
            return FrameCheck::Stale {
                rotation: format.rotation,
                display_mode: format.display_mode,
            };
        }

        let display_mode = if self.configuration.is_resizable() {
            match self.display_mode {
                Some(assumed) if assumed != format.display_mode => {
                    self.skip_frame();
                    return FrameCheck::Stale {
                        rotation: format.rotation,
                        display_mode: format.display_mode,
                    };
                }
                _ => {}
            }
            match self.configuration.display_mode(format.display_mode) {
                Some(mode) => {
                    self.display_mode = Some(format.display_mode);
                    Some(mode.clone())
                }
                None => {
                    return FrameCheck::Invalid {
                        reason: InvalidFrame::UnknownDisplayMode(format.display_mode),
                        lost: 0,
                    }
                }
            }
        } else {
            None
        };

        let lost = match self.expected_frame {
            Some(expected) if message.seq > expected => message.seq - expected,
            _ => 0,
        };
        self.expected_frame = Some(message.seq.wrapping_add(1));

        let image_size = Size::new(width, height);
        let folded = format.folded_display.filter(|r| !r.is_empty());
        if let Some(mode) = &display_mode {
            let reference = match folded {
                Some(region) if self.configuration.is_foldable() => region.size(),
                _ => mode.size(),
            };
            if !aspect_ratio_matches(image_size, format.rotation, reference.aspect_ratio()) {
                let upright = image_size.rotated(format.rotation);
                return FrameCheck::Invalid {
                    reason: InvalidFrame::AspectRatio {
                        image_width: upright.width,
                        image_height: upright.height,
                        display_width: reference.width,
                        display_height: reference.height,
                        folded: folded.is_some() && self.configuration.is_foldable(),
                    },
                    lost,
                };
            }
        }

        let active_region = match (folded, &display_mode) {
            (Some(region), _) => Some(region),
            (None, Some(mode)) => Some(Rect::from_size(mode.size())),
            (None, None) => None,
        };

        FrameCheck::Accept {
            shape: DisplayShape {
                width,
                height,
                rotation: format.rotation,
                active_region,
                display_mode,
                frame_number: message.seq,
            },
            lost,
        }
    }
}

/// A decoded frame waiting for its skin layout.
#[derive(Debug)]
pub struct DecodedFrame {
    pub shape: DisplayShape,
    pub pixels: PixelBuffer,
    pub timestamp_us: u64,
    pub(crate) generation: u64,
}

impl DecodedFrame {
    pub fn with_skin(self, skin: Arc<SkinLayout>) -> Screenshot {
        Screenshot {
            shape: self.shape,
            pixels: self.pixels,
            skin,
            timestamp_us: self.timestamp_us,
            generation: self.generation,
        }
    }
}

/// A frame ready to be painted.
#[derive(Debug)]
pub struct Screenshot {
    pub shape: DisplayShape,
    pub pixels: PixelBuffer,
    pub skin: Arc<SkinLayout>,
    /// Device-side capture time.
    pub timestamp_us: u64,
    pub(crate) generation: u64,
}

/// `true` when two image sizes have aspect ratios within `tolerance` of
/// each other.
pub fn same_aspect_ratio(a: Size, b: Size, tolerance: f64) -> bool {
    if a.is_empty() || b.is_empty() {
        return a.is_empty() == b.is_empty();
    }
    (a.aspect_ratio() / b.aspect_ratio() - 1.0).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::device::fixtures::configuration;
    use mirror_core::domain::display::DisplayMode;
    use mirror_core::protocol::messages::ImageFormat;

    fn frame(width: u32, height: u32, rotation: Rotation, seq: u32) -> ImageMessage {
        ImageMessage {
            format: ImageFormat { width, height, rotation, ..Default::default() },
            image: vec![0; width as usize * height as usize * 3],
            seq,
            timestamp_us: 0,
        }
    }

    fn validator() -> FrameValidator {
        FrameValidator::new(Arc::new(configuration(100, 200)), Rotation::Deg0, None)
    }

    fn resizable_validator(assumed: Option<DisplayModeValue>) -> FrameValidator {
        let mut config = configuration(1080, 2400);
        config.display_modes = vec![
            DisplayMode::parse("phone-0-1080-2400-420").unwrap(),
            DisplayMode::parse("tablet-2-1920-1200-240").unwrap(),
        ];
        FrameValidator::new(Arc::new(config), Rotation::Deg0, assumed)
    }

    #[test]
    fn test_first_frame_reports_no_lost_frames() {
        // Arrange
        let mut validator = validator();

        // Act
        let check = validator.check(&frame(50, 100, Rotation::Deg0, 41));

        // Assert
        assert!(matches!(check, FrameCheck::Accept { lost: 0, .. }));
        assert_eq!(validator.expected_frame(), Some(42));
    }

    #[test]
    fn test_sequence_gap_is_counted_as_lost() {
        let mut validator = validator();
        validator.check(&frame(50, 100, Rotation::Deg0, 1));
        let check = validator.check(&frame(50, 100, Rotation::Deg0, 5));
        assert!(matches!(check, FrameCheck::Accept { lost: 3, .. }));
    }

    #[test]
    fn test_payload_size_mismatch_is_invalid_and_keeps_expected_counter() {
        // Arrange
        let mut validator = validator();
        validator.check(&frame(50, 100, Rotation::Deg0, 1));
        let mut bad = frame(50, 100, Rotation::Deg0, 2);
        bad.image.pop();

        // Act
        let check = validator.check(&bad);

        // Assert
        match check {
            FrameCheck::Invalid { reason: InvalidFrame::PayloadSize { actual, expected, .. }, .. } => {
                assert_eq!((actual, expected), (14_999, 15_000));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(validator.expected_frame(), Some(2));
    }

    #[test]
    fn test_zero_dimension_is_invalid_and_advances_counter() {
        // Arrange
        let mut validator = validator();
        validator.check(&frame(50, 100, Rotation::Deg0, 1));
        let empty = ImageMessage {
            format: ImageFormat { width: 0, height: 100, ..Default::default() },
            seq: 2,
            ..Default::default()
        };

        // Act
        let check = validator.check(&empty);

        // Assert
        match check {
            FrameCheck::Invalid { reason, .. } => assert_eq!(reason.to_string(), "degenerate 0x100 image"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(validator.expected_frame(), Some(3));
        assert!(matches!(validator.check(&frame(50, 100, Rotation::Deg0, 3)), FrameCheck::Accept { lost: 0, .. }));
    }

    #[test]
    fn test_rotation_mismatch_is_stale_and_not_lost() {
        // Arrange
        let mut validator = validator();
        validator.check(&frame(50, 100, Rotation::Deg0, 1));

        // Act
        let check = validator.check(&frame(100, 50, Rotation::Deg90, 2));

        // Assert
        assert_eq!(
            check,
            FrameCheck::Stale { rotation: Rotation::Deg90, display_mode: DisplayModeValue::Phone }
        );
        assert!(matches!(validator.check(&frame(50, 100, Rotation::Deg0, 3)), FrameCheck::Accept { lost: 0, .. }));
    }

    #[test]
    fn test_skip_before_first_frame_keeps_sentinel() {
        let mut validator = validator();
        validator.skip_frame();
        assert_eq!(validator.expected_frame(), None);
    }

    #[test]
    fn test_display_mode_mismatch_is_stale() {
        // Arrange
        let mut validator = resizable_validator(Some(DisplayModeValue::Phone));
        let mut tablet = frame(960, 600, Rotation::Deg0, 1);
        tablet.format.display_mode = DisplayModeValue::Tablet;

        // Act
        let check = validator.check(&tablet);

        // Assert
        assert_eq!(
            check,
            FrameCheck::Stale { rotation: Rotation::Deg0, display_mode: DisplayModeValue::Tablet }
        );
    }

    #[test]
    fn test_unassumed_mode_is_adopted_and_sets_active_region() {
        // Arrange
        let mut validator = resizable_validator(None);
        let mut tablet = frame(960, 600, Rotation::Deg0, 1);
        tablet.format.display_mode = DisplayModeValue::Tablet;

        // Act
        let check = validator.check(&tablet);

        // Assert
        match check {
            FrameCheck::Accept { shape, .. } => {
                assert_eq!(shape.active_region, Some(Rect::new(0, 0, 1920, 1200)));
                assert_eq!(shape.display_mode.map(|m| m.id), Some(DisplayModeValue::Tablet));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_aspect_ratio_mismatch_is_invalid() {
        // Arrange: 540x1000 is not 1080x2400 within 1/540 + 1/1000.
        let mut validator = resizable_validator(Some(DisplayModeValue::Phone));

        // Act
        let check = validator.check(&frame(540, 1000, Rotation::Deg0, 1));

        // Assert
        match check {
            FrameCheck::Invalid { reason: InvalidFrame::AspectRatio { display_width, display_height, .. }, .. } => {
                assert_eq!((display_width, display_height), (1080, 2400));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rotated_frame_matches_aspect_after_swap() {
        // Arrange: a landscape image of the portrait phone display.
        let mut validator = FrameValidator::new(
            Arc::new({
                let mut config = configuration(1080, 2400);
                config.display_modes = vec![DisplayMode::parse("phone-0-1080-2400-420").unwrap()];
                config
            }),
            Rotation::Deg90,
            Some(DisplayModeValue::Phone),
        );

        // Act
        let check = validator.check(&frame(1200, 540, Rotation::Deg90, 1));

        // Assert
        assert!(matches!(check, FrameCheck::Accept { .. }));
    }

    #[test]
    fn test_unknown_display_mode_is_invalid() {
        let mut validator = resizable_validator(None);
        let mut desktop = frame(100, 100, Rotation::Deg0, 1);
        desktop.format.display_mode = DisplayModeValue::Desktop;
        assert!(matches!(
            validator.check(&desktop),
            FrameCheck::Invalid { reason: InvalidFrame::UnknownDisplayMode(DisplayModeValue::Desktop), .. }
        ));
    }

    #[test]
    fn test_same_aspect_ratio_uses_relative_tolerance() {
        assert!(same_aspect_ratio(Size::new(1000, 500), Size::new(2000, 1001), 0.01));
        assert!(!same_aspect_ratio(Size::new(1000, 500), Size::new(500, 1000), 0.01));
    }
}
