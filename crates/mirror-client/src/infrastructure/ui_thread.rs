//! Dedicated OS thread that plays the role of the UI thread.
//!
//! The binary has no windowing toolkit, but the display pipeline still needs
//! one thread that owns "what is on screen".  `UiThread` runs queued
//! closures one at a time, in submission order, on its own thread.

use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::debug;

use crate::application::ui::{UiDispatcher, UiTask};

enum UiMessage {
    Run(UiTask),
    Stop,
}

/// A thread executing [`UiTask`]s.  Dropping it (or calling
/// [`stop`](Self::stop)) lets queued tasks finish and joins the thread.
pub struct UiThread {
    tasks: mpsc::UnboundedSender<UiMessage>,
    thread: Option<JoinHandle<()>>,
}

impl UiThread {
    /// # Errors
    ///
    /// Returns the I/O error if the OS refuses to create the thread.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tasks, mut queue) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Some(UiMessage::Run(task)) = queue.blocking_recv() {
                task();
            }
            debug!("UI thread finished");
        })?;
        Ok(Self {
            tasks,
            thread: Some(thread),
        })
    }

    /// A dispatcher feeding this thread.
    pub fn dispatcher(&self) -> UiThreadDispatcher {
        UiThreadDispatcher { tasks: self.tasks.clone() }
    }

    /// Runs the tasks queued so far, then ends the thread.
    pub fn stop(&mut self) {
        let _ = self.tasks.send(UiMessage::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`UiDispatcher`] handing tasks to a [`UiThread`].  Tasks dispatched
/// after the thread stopped are dropped.
#[derive(Clone)]
pub struct UiThreadDispatcher {
    tasks: mpsc::UnboundedSender<UiMessage>,
}

impl UiDispatcher for UiThreadDispatcher {
    fn dispatch(&self, task: UiTask) {
        let _ = self.tasks.send(UiMessage::Run(task));
    }
}
