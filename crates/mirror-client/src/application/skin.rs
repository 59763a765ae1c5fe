//! Device frame artwork ("skin") geometry and its per-shape cache.
//!
//! A [`SkinDefinition`] describes the frame around the display in the
//! device's native orientation.  For every distinct frame shape the pipeline
//! needs a [`SkinLayout`]: the frame scaled to the received image and rotated
//! to its orientation, plus the alpha mask of the display's rounded corners.
//! Building the mask is the expensive part, so layouts are cached by
//! [`ShapeKey`] and the foldable posture they were built for.

use std::sync::{Arc, Mutex};

use mirror_core::domain::display::{DisplayShape, Rect, Rotation, ShapeKey, Size};

/// Frame artwork geometry in the device's native orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinDefinition {
    /// Size of the whole frame image.
    pub frame_size: Size,
    /// Where the display sits inside the frame.
    pub display_rect: Rect,
    /// Radius of the display's rounded corners, in frame pixels.
    pub corner_radius: u32,
}

impl SkinDefinition {
    /// Scales and rotates the frame so that its display area matches an
    /// image of `image_size` shown at `rotation`.
    pub fn create_scaled_layout(&self, image_size: Size, rotation: Rotation) -> SkinLayout {
        if self.display_rect.is_empty() || image_size.is_empty() {
            return SkinLayout::plain(image_size);
        }

        let upright = image_size.rotated(rotation);
        let scale = f64::from(upright.width) / f64::from(self.display_rect.width);
        let scale_coord = |v: i32| (f64::from(v) * scale).round() as i32;

        let frame = self.frame_size.scaled(scale);
        let display = Rect::new(
            scale_coord(self.display_rect.x),
            scale_coord(self.display_rect.y),
            upright.width,
            upright.height,
        );
        let rotated_display = display.rotated_in(frame, rotation);
        let rotated_frame = frame.rotated(rotation);

        let corner_radius = (f64::from(self.corner_radius) * scale).round() as u32;
        SkinLayout {
            display_size: image_size,
            frame_rect: Rect::new(
                -rotated_display.x,
                -rotated_display.y,
                rotated_frame.width,
                rotated_frame.height,
            ),
            corner_radius,
            corner_mask: Arc::new(corner_mask(corner_radius)),
        }
    }
}

/// Frame geometry matched to one frame shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinLayout {
    pub display_size: Size,
    /// Frame bounds relative to the display's top-left corner.
    pub frame_rect: Rect,
    pub corner_radius: u32,
    /// `corner_radius²` alpha values for the top-left corner, row-major.
    /// Other corners are mirror images.
    pub corner_mask: Arc<Vec<u8>>,
}

impl SkinLayout {
    /// Layout without any frame: the display alone.
    pub fn plain(display_size: Size) -> Self {
        Self {
            display_size,
            frame_rect: Rect::from_size(display_size),
            corner_radius: 0,
            corner_mask: Arc::new(Vec::new()),
        }
    }

    /// Bounds of everything drawn, relative to the display's top-left corner.
    pub fn bounds(&self) -> Rect {
        let left = self.frame_rect.x.min(0);
        let top = self.frame_rect.y.min(0);
        let right = self.frame_rect.right().max(self.display_size.width as i32);
        let bottom = self.frame_rect.bottom().max(self.display_size.height as i32);
        Rect::new(left, top, (right - left) as u32, (bottom - top) as u32)
    }
}

/// Anti-aliased quarter-circle mask for a rounded corner.
fn corner_mask(radius: u32) -> Vec<u8> {
    let r = f64::from(radius);
    let mut mask = Vec::with_capacity((radius * radius) as usize);
    for y in 0..radius {
        for x in 0..radius {
            // Distance of the pixel centre from the circle centre at (r, r).
            let dx = r - (f64::from(x) + 0.5);
            let dy = r - (f64::from(y) + 0.5);
            let coverage = (r - (dx * dx + dy * dy).sqrt() + 0.5).clamp(0.0, 1.0);
            mask.push((coverage * 255.0).round() as u8);
        }
    }
    mask
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Posture of a foldable folded shut.  The device frame does not apply to it.
pub const POSTURE_CLOSED: u32 = 1;

type CacheKey = (ShapeKey, Option<u32>);

/// Single-entry cache of the skin layout for the most recent shape and
/// posture.
///
/// Frames of a stream almost always share one shape, so one entry is enough;
/// a rotation, resize or posture change replaces it.
pub struct SkinLayoutCache {
    skin: Option<SkinDefinition>,
    entry: Mutex<Option<(CacheKey, Arc<SkinLayout>)>>,
}

impl SkinLayoutCache {
    pub fn new(skin: Option<SkinDefinition>) -> Self {
        Self {
            skin,
            entry: Mutex::new(None),
        }
    }

    /// The device frame drawn in `posture`, if any.
    pub fn skin(&self, posture: Option<u32>) -> Option<&SkinDefinition> {
        self.skin.as_ref().filter(|_| posture != Some(POSTURE_CLOSED))
    }

    /// Returns the cached layout for `shape` in `posture` without computing
    /// anything.
    pub fn get_cached(&self, shape: &DisplayShape, posture: Option<u32>) -> Option<Arc<SkinLayout>> {
        let key = (shape.geometry_key(), posture);
        let guard = self.entry.lock().ok()?;
        guard
            .as_ref()
            .filter(|(cached_key, _)| *cached_key == key)
            .map(|(_, layout)| Arc::clone(layout))
    }

    /// Returns the layout for `shape` in `posture`, computing and caching it
    /// on a miss.  May be slow; call it off the UI thread.
    pub fn get(&self, shape: &DisplayShape, posture: Option<u32>) -> Arc<SkinLayout> {
        if let Some(layout) = self.get_cached(shape, posture) {
            return layout;
        }
        let layout = Arc::new(self.compute(shape, posture));
        if let Ok(mut guard) = self.entry.lock() {
            *guard = Some(((shape.geometry_key(), posture), Arc::clone(&layout)));
        }
        layout
    }

    fn compute(&self, shape: &DisplayShape, posture: Option<u32>) -> SkinLayout {
        // A folded display shows only part of the device; the frame of the
        // unfolded device does not apply to it.
        let whole_display = shape.display_mode.as_ref().map(|mode| Rect::from_size(mode.size()));
        let folded = shape.active_region.is_some() && shape.active_region != whole_display;
        match self.skin(posture) {
            Some(skin) if !folded => skin.create_scaled_layout(shape.size(), shape.rotation),
            _ => SkinLayout::plain(shape.size()),
        }
    }
}
