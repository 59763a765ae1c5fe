//! Seams to the UI side: the thread that owns UI state and the paint sink.
//!
//! Frame decoding and skin work happen on Tokio tasks and the blocking pool.
//! Everything that swaps the displayed image runs through a
//! [`UiDispatcher`], which executes closures on the single UI-owned thread
//! (`infrastructure::ui_thread::UiThread` in the binary).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::application::frame_stream::Screenshot;

/// A unit of work for the UI thread.
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs closures on the UI thread, in submission order.
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: UiTask);
}

/// Receives every frame that became the displayed image.  Called on the UI
/// thread.
pub trait FrameSink: Send + Sync {
    fn frame_ready(&self, display_id: u32, screenshot: &Arc<Screenshot>);

    /// The view decided that the zoom level no longer makes sense.
    fn zoom_reset(&self, _display_id: u32) {}
}

/// Runs each task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateUiDispatcher;

impl UiDispatcher for ImmediateUiDispatcher {
    fn dispatch(&self, task: UiTask) {
        task()
    }
}

/// Queues tasks until the test runs them with [`run_pending`](Self::run_pending).
#[derive(Default)]
pub struct ManualUiDispatcher {
    queue: Mutex<VecDeque<UiTask>>,
}

impl ManualUiDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Runs queued tasks, including ones queued while running, until the
    /// queue is empty.  Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            // The lock is released before the task runs; tasks may dispatch.
            let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
            match next {
                Some(task) => {
                    task();
                    count += 1;
                }
                None => return count,
            }
        }
    }
}

impl UiDispatcher for ManualUiDispatcher {
    fn dispatch(&self, task: UiTask) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(task);
        }
    }
}

/// Records frames in arrival order.
#[derive(Default)]
pub struct RecordingFrameSink {
    pub frames: Mutex<Vec<(u32, Arc<Screenshot>)>>,
    pub zoom_resets: Mutex<Vec<u32>>,
}

impl RecordingFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Sequence numbers of the recorded frames.
    pub fn frame_numbers(&self) -> Vec<u32> {
        self.frames
            .lock()
            .map(|f| f.iter().map(|(_, s)| s.shape.frame_number).collect())
            .unwrap_or_default()
    }
}

impl FrameSink for RecordingFrameSink {
    fn frame_ready(&self, display_id: u32, screenshot: &Arc<Screenshot>) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push((display_id, Arc::clone(screenshot)));
        }
    }

    fn zoom_reset(&self, display_id: u32) {
        if let Ok(mut resets) = self.zoom_resets.lock() {
            resets.push(display_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_dispatcher_runs_tasks_in_order_including_nested() {
        // Arrange
        let ui = Arc::new(ManualUiDispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2, inner_ui) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&ui));
        ui.dispatch(Box::new(move || {
            l1.lock().unwrap().push(1);
            let l3 = Arc::clone(&l1);
            inner_ui.dispatch(Box::new(move || l3.lock().unwrap().push(3)));
        }));
        ui.dispatch(Box::new(move || l2.lock().unwrap().push(2)));

        // Act
        let ran = ui.run_pending();

        // Assert
        assert_eq!(ran, 3);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(ui.pending(), 0);
    }

    #[test]
    fn test_immediate_dispatcher_runs_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        ImmediateUiDispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
