//! Pixel buffers for decoded frames and their recycling.
//!
//! Frames arrive as packed RGB888 bytes and are unpacked into one `u32`
//! (`0xAARRGGBB`) per pixel.  Allocating a full-resolution buffer for every
//! frame is expensive, so the buffer of a superseded frame is parked in a
//! [`BufferRecycler`] and reused by the next frame of exactly the same size.
//! A parked buffer that nobody claims within the expiry time is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mirror_core::domain::display::Size;
use mirror_core::protocol::messages::RGB888_BYTES_PER_PIXEL;
use tokio::runtime::Handle;

/// Decoded frame pixels, row-major `0xAARRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    size: Size,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    /// An opaque black buffer.
    pub fn new(size: Size) -> Self {
        Self {
            size,
            pixels: vec![0xFF00_0000; size.area() as usize],
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Pixel at (`x`, `y`), `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels.get((y * self.size.width + x) as usize).copied()
    }

    /// Overwrites the buffer with packed RGB888 `bytes`.  Extra bytes are
    /// ignored; missing ones leave the remaining pixels unchanged.
    pub fn fill_from_rgb888(&mut self, bytes: &[u8]) {
        for (pixel, rgb) in self.pixels.iter_mut().zip(bytes.chunks_exact(RGB888_BYTES_PER_PIXEL)) {
            *pixel = 0xFF00_0000 | u32::from(rgb[0]) << 16 | u32::from(rgb[1]) << 8 | u32::from(rgb[2]);
        }
    }
}

/// Unpacks RGB888 `bytes` of a `size` image, reusing `recycled` when its
/// size matches exactly.
pub fn unpack_rgb888(bytes: &[u8], size: Size, recycled: Option<PixelBuffer>) -> PixelBuffer {
    let mut buffer = match recycled {
        Some(buffer) if buffer.size == size => buffer,
        _ => PixelBuffer::new(size),
    };
    buffer.fill_from_rgb888(bytes);
    buffer
}

// ── Recycler ──────────────────────────────────────────────────────────────────

/// Single-slot parking place for a pixel buffer.
///
/// `recycle` parks a buffer and arms a timer; when the timer fires before
/// the buffer is claimed, the slot is cleared.  Each `recycle` bumps an
/// epoch so that a timer armed for an older buffer never clears a newer one.
pub struct BufferRecycler {
    slot: Arc<Mutex<Option<PixelBuffer>>>,
    epoch: Arc<AtomicU64>,
    expiry: Duration,
    runtime: Option<Handle>,
}

impl BufferRecycler {
    /// Creates a recycler whose parked buffers expire after `expiry`.
    /// Outside a Tokio runtime buffers never expire.
    pub fn new(expiry: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
            expiry,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Parks `buffer`, replacing whatever was parked.
    pub fn recycle(&self, buffer: PixelBuffer) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(buffer);
        }

        let Some(runtime) = &self.runtime else {
            return;
        };
        let slot = Arc::clone(&self.slot);
        let current = Arc::clone(&self.epoch);
        let expiry = self.expiry;
        runtime.spawn(async move {
            tokio::time::sleep(expiry).await;
            if current.load(Ordering::SeqCst) == epoch {
                if let Ok(mut slot) = slot.lock() {
                    slot.take();
                }
            }
        });
    }

    /// Claims the parked buffer if it is exactly `size`.  A parked buffer of
    /// another size is released.
    pub fn take(&self, size: Size) -> Option<PixelBuffer> {
        let parked = self.slot.lock().ok()?.take()?;
        (parked.size == size).then_some(parked)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}
