//! Frame counters of one display view.
//!
//! - *frames*: images that became the displayed image.
//! - *dropped*: valid frames superseded before they were displayed.
//! - *lost*: gaps in the frame sequence numbers.
//! - *invalid*: frames rejected as inconsistent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free frame counters.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: AtomicU64,
    dropped: AtomicU64,
    lost: AtomicU64,
    invalid: AtomicU64,
    latency_total_us: AtomicU64,
    latency_samples: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatsSnapshot {
    pub frames: u64,
    pub dropped: u64,
    pub lost: u64,
    pub invalid: u64,
    pub average_latency: Option<Duration>,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a displayed frame and its capture-to-display latency.
    pub fn record_frame(&self, latency: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(latency.as_micros().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, count: u32) {
        if count > 0 {
            self.lost.fetch_add(u64::from(count), Ordering::Relaxed);
        }
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameStatsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let total = self.latency_total_us.load(Ordering::Relaxed);
        FrameStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            average_latency: (samples > 0).then(|| Duration::from_micros(total / samples)),
        }
    }
}

impl fmt::Display for FrameStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames: {}, dropped: {}, lost: {}, invalid: {}",
            self.frames, self.dropped, self.lost, self.invalid
        )?;
        if let Some(latency) = self.average_latency {
            write!(f, ", average latency: {} ms", latency.as_millis())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages_latency() {
        // Arrange
        let stats = FrameStats::new();

        // Act
        stats.record_frame(Duration::from_millis(10));
        stats.record_frame(Duration::from_millis(30));
        stats.record_lost(0);
        stats.record_lost(3);
        stats.record_dropped();
        stats.record_invalid();

        // Assert
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames, 2);
        assert_eq!(snapshot.lost, 3);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.invalid, 1);
        assert_eq!(snapshot.average_latency, Some(Duration::from_millis(20)));
        assert_eq!(
            snapshot.to_string(),
            "frames: 2, dropped: 1, lost: 3, invalid: 1, average latency: 20 ms"
        );
    }

    #[test]
    fn test_empty_snapshot_has_no_latency() {
        assert_eq!(FrameStats::new().snapshot(), FrameStatsSnapshot::default());
    }
}
