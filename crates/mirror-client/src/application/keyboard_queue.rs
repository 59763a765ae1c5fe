//! Ordered delivery of keyboard events.
//!
//! Key presses must reach the device in the order they were typed, but each
//! `sendKey` is an independent unary call and concurrent calls may complete
//! in any order.  The queue allows a single call in flight; later events wait
//! until the previous call has completed.
//!
//! ```text
//! submit(A) ─▶ dispatch A            pending: []
//! submit(B) ─▶ (queued)              pending: [B]
//! submit(C) ─▶ (queued)              pending: [B, C]
//! A done    ─▶ complete() = B        pending: [C]
//! B done    ─▶ complete() = C        pending: []
//! C done    ─▶ complete() = None     idle
//! ```
//!
//! The "is a call in flight" flag and the pending list change together under
//! one lock, so an event can never slip past one that was queued earlier.

use std::collections::VecDeque;
use std::sync::Mutex;

use mirror_core::protocol::messages::KeyboardEvent;
use mirror_core::protocol::status::RpcStatus;
use tokio::sync::oneshot;

/// Outcome of one keyboard call.
pub type KeyResult = Result<(), RpcStatus>;

/// A keyboard event together with the channel its outcome is reported on.
#[derive(Debug)]
pub struct KeyEnvelope {
    pub event: KeyboardEvent,
    pub responder: oneshot::Sender<KeyResult>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<KeyEnvelope>,
    in_flight: bool,
}

/// Serializes keyboard calls.  See the module documentation.
#[derive(Debug, Default)]
pub struct KeyboardQueue {
    state: Mutex<QueueState>,
}

impl KeyboardQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts an event.  Returns it back when the caller must dispatch it
    /// right away, or `None` when it was queued behind a call in flight.
    pub fn submit(&self, envelope: KeyEnvelope) -> Option<KeyEnvelope> {
        let Ok(mut state) = self.state.lock() else {
            return Some(envelope);
        };
        if state.in_flight {
            state.pending.push_back(envelope);
            None
        } else {
            state.in_flight = true;
            Some(envelope)
        }
    }

    /// Marks the call in flight as completed and returns the next event to
    /// dispatch, if any.  The queue goes idle when nothing is pending.
    pub fn complete(&self) -> Option<KeyEnvelope> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let next = state.pending.pop_front();
        state.in_flight = next.is_some();
        next
    }

    /// Drops every queued event, answering each with `Cancelled`.  Returns
    /// the number of events dropped.  A call already in flight is not
    /// affected.
    pub fn flush(&self, reason: &str) -> usize {
        let drained: Vec<KeyEnvelope> = match self.state.lock() {
            Ok(mut state) => state.pending.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let count = drained.len();
        for envelope in drained {
            let _ = envelope.responder.send(Err(RpcStatus::cancelled(reason)));
        }
        count
    }

    /// Number of events waiting behind the call in flight.
    pub fn pending_len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().map(|s| !s.in_flight).unwrap_or(true)
    }
}
