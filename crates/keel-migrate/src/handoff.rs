//! Zero-capacity, multi-consumer handoff channel.
//!
//! A send completes only once an idle receiver has taken the item, so the
//! sender never runs ahead of its consumers and nothing sits buffered in
//! between. Idle receivers park a `oneshot` slot in a ready queue; the
//! sender pops a slot and fills it.
//!
//! Dropping the [`HandoffSender`] closes the channel: every waiting and
//! future [`HandoffReceiver::recv`] returns `None`.

use tokio::sync::{mpsc, oneshot};

/// Create a handoff channel.
pub fn channel<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (ready_tx, ready_rx) = mpsc::unbounded_channel();
    (
        HandoffSender { ready: ready_rx },
        HandoffReceiver { ready: ready_tx },
    )
}

/// Sending half. There is exactly one.
pub struct HandoffSender<T> {
    ready: mpsc::UnboundedReceiver<oneshot::Sender<T>>,
}

/// Receiving half. Clone it once per consumer.
pub struct HandoffReceiver<T> {
    ready: mpsc::UnboundedSender<oneshot::Sender<T>>,
}

impl<T> Clone for HandoffReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            ready: self.ready.clone(),
        }
    }
}

impl<T> HandoffSender<T> {
    /// Wait for an idle receiver and hand it `item`.
    ///
    /// Returns the item back if every receiver is gone. Cancel safe: if the
    /// future is dropped before completing, no receiver got the item.
    pub async fn send(&mut self, mut item: T) -> Result<(), T> {
        loop {
            let Some(slot) = self.ready.recv().await else {
                return Err(item);
            };
            // A receiver that gave up leaves a dead slot behind; try the next one.
            match slot.send(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Wait for the next item. Returns `None` once the sender is dropped.
    pub async fn recv(&self) -> Option<T> {
        let (slot, item) = oneshot::channel();
        self.ready.send(slot).ok()?;
        item.await.ok()
    }
}
