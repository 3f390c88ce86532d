//! Readiness detection from console output.
//!
//! The gate counts occurrences of the ready marker across output chunks and
//! fires a one-shot event the first time the running total reaches the
//! required count. Occurrences split across two chunks are not reassembled.

use crate::config::ReadyCondition;
use async_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info};

/// Create a gate and the signal it fires
pub fn readiness_gate(condition: ReadyCondition) -> (ReadinessGate, ReadySignal) {
    let (tx, rx) = async_channel::bounded(1);
    let gate = ReadinessGate {
        condition,
        seen: 0,
        ready: Some(tx),
    };
    (gate, ReadySignal { rx })
}

/// Counts ready markers in output chunks
///
/// Owned by the stdout pump, the only writer of the counter.
#[derive(Debug)]
pub struct ReadinessGate {
    condition: ReadyCondition,
    seen: usize,
    ready: Option<Sender<()>>,
}

impl ReadinessGate {
    /// Inspect one output chunk. Returns true if this chunk fired the event.
    pub fn inspect(&mut self, chunk: &[u8]) -> bool {
        let Some(ready) = &self.ready else {
            return false;
        };

        let text = String::from_utf8_lossy(chunk);
        let text = text.trim();
        let found = text.matches(self.condition.message.as_str()).count();
        if found == 0 {
            return false;
        }

        self.seen += found;
        debug!(
            seen = self.seen,
            required = self.condition.count,
            "found ready statement"
        );
        if self.seen < self.condition.count {
            return false;
        }

        info!(line = text, "server output reached ready state");
        // Capacity is one and this is the only send, so it cannot be full.
        let _ = ready.try_send(());
        // Dropping the sender closes the channel behind the event.
        self.ready = None;
        true
    }

    /// Total occurrences seen so far
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Whether the event has been fired
    pub fn is_ready(&self) -> bool {
        self.ready.is_none()
    }
}

/// Outcome of waiting on a [`ReadySignal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The gate fired
    Ready,
    /// The gate was dropped without firing, the output stream ended
    Closed,
}

/// Receiving half of the one-shot ready event
#[derive(Debug)]
pub struct ReadySignal {
    rx: Receiver<()>,
}

impl ReadySignal {
    /// Wait for the gate to fire or go away
    pub async fn recv(&self) -> Readiness {
        match self.rx.recv().await {
            Ok(()) => Readiness::Ready,
            Err(_) => Readiness::Closed,
        }
    }

    /// Check without waiting; `None` while still pending
    pub fn try_recv(&self) -> Option<Readiness> {
        match self.rx.try_recv() {
            Ok(()) => Some(Readiness::Ready),
            Err(TryRecvError::Closed) => Some(Readiness::Closed),
            Err(TryRecvError::Empty) => None,
        }
    }
}
