//! Single-use delivery slots between the orchestrator and its callers.
//!
//! A [`ResultSlot`] is written at most once. Writing consumes the sender, so
//! a second write is reported as [`Delivery::AlreadyFilled`] instead of
//! being silently dropped, and a caller that stopped listening turns the
//! write into [`Delivery::ReceiverGone`]. Neither case blocks the producer.

use tokio::sync::oneshot;

use super::types::BatchResult;

/// Outcome of writing to a [`ResultSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The caller holds the receiver and now has the result.
    Delivered,
    /// The caller discarded its receiver (e.g. after a timeout). No-op.
    ReceiverGone,
    /// The slot was already written. No-op.
    AlreadyFilled,
}

/// Producer side of a result conduit.
#[derive(Debug)]
pub struct ResultSlot {
    sender: Option<oneshot::Sender<BatchResult>>,
}

impl ResultSlot {
    /// Create a connected slot and receiver.
    pub fn channel() -> (ResultSlot, ResultReceiver) {
        let (tx, rx) = oneshot::channel();
        (ResultSlot { sender: Some(tx) }, ResultReceiver { rx })
    }

    /// Write the result. Only the first call can deliver.
    pub fn deliver(&mut self, result: BatchResult) -> Delivery {
        match self.sender.take() {
            None => Delivery::AlreadyFilled,
            Some(tx) => match tx.send(result) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::ReceiverGone,
            },
        }
    }

    #[cfg(test)]
    fn is_consumed(&self) -> bool {
        self.sender.is_none()
    }
}

/// Caller side of a result conduit.
#[derive(Debug)]
pub struct ResultReceiver {
    rx: oneshot::Receiver<BatchResult>,
}

impl ResultReceiver {
    /// A receiver that already holds its result.
    pub fn ready(result: BatchResult) -> Self {
        let (mut slot, receiver) = ResultSlot::channel();
        slot.deliver(result);
        receiver
    }

    /// Wait for the result.
    ///
    /// If the producer is dropped without writing (orchestrator torn down),
    /// this resolves to an `abandoned` error rather than hanging.
    pub async fn recv(self) -> BatchResult {
        self.rx
            .await
            .unwrap_or_else(|_| BatchResult::abandoned("result producer went away"))
    }

    /// Take the result if it has already been delivered.
    pub fn try_recv(&mut self) -> Option<BatchResult> {
        self.rx.try_recv().ok()
    }
}
