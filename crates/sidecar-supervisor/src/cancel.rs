//! Close-to-broadcast latches built on `async-channel`.
//!
//! Nothing is ever sent on the underlying channel. Closing it wakes every
//! pending `recv`, which makes a cheap one-way broadcast that can never be
//! reset.

use async_channel::{Receiver, Sender};

/// A one-way flag that can be awaited
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Latch {
    /// Create an unset latch
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    /// Set the latch, waking all waiters. Returns false if it was already set.
    pub fn set(&self) -> bool {
        self.tx.close()
    }

    /// Whether the latch has been set
    pub fn is_set(&self) -> bool {
        self.rx.is_closed()
    }

    /// Wait until the latch is set
    pub async fn wait(&self) {
        let _ = self.rx.recv().await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide cancellation token
///
/// Cloning shares the token. Only the signal listener and the entry point's
/// teardown cancel it; everything else only observes it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    latch: Latch,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token. Returns false if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.latch.set()
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.latch.is_set()
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        self.latch.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_cancel_wakes_all_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();

        let waiter = smol::spawn(async move {
            observer.cancelled().await;
            observer.is_cancelled()
        });

        smol::Timer::after(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
        assert!(token.cancel());

        assert!(waiter.await);
    }

    #[test]
    fn test_cancel_is_effective_once() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[smol_potat::test]
    async fn test_set_latch_resolves_immediately() {
        let latch = Latch::new();
        latch.set();
        latch.wait().await;
        assert!(latch.is_set());
    }
}
