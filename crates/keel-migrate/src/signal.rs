//! Edge-triggered, single-slot notifications.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A pending flag plus a wakeup.
///
/// Only "has this happened since the last check" is recorded: raising an
/// already raised signal is a no-op and never blocks the raiser.
#[derive(Debug, Default)]
pub struct Signal {
    pending: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create a signal with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal pending and wake a waiter, if any.
    pub fn raise(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Discard a pending event. Returns whether one was pending.
    pub fn clear(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Whether an event is pending.
    pub fn is_raised(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until the signal is raised, then consume the event.
    ///
    /// Cancel safe: dropping the future before it completes leaves a
    /// pending event in place.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a raise between
            // the check and the await is not lost.
            let notified = self.notify.notified();
            if self.clear() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_raise_before_wait() {
        let signal = Signal::new();
        signal.raise();
        signal.raise(); // coalesces

        signal.wait().await;
        assert!(!signal.is_raised());

        let again = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(again.is_err(), "second wait should not see a coalesced raise");
    }

    #[tokio::test]
    async fn test_raise_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;

        signal.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_clear() {
        let signal = Signal::new();
        assert!(!signal.clear());
        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.clear());
        assert!(!signal.is_raised());
    }
}
