// SPDX-License-Identifier: Apache-2.0

//! Backpressured handoff between a producer task and a single consumer.
//!
//! Thin wrapper over flume. The producer side can race a send against a
//! [`CancellationToken`] so that shutdown never has to send into a closed
//! destination: once cancellation is observed the pending send is abandoned
//! and the item is dropped without reaching the receiver.

use flume::{Receiver, Sender};
use std::fmt;
use tokio::select;
use tokio_util::sync::CancellationToken;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

/// Failure to hand off an item.
#[derive(PartialEq, Eq)]
pub enum SendError<T> {
    /// The receiving side was dropped. The undelivered item is returned.
    Disconnected(T),
    /// The cancellation token fired before the receiver took the item.
    Cancelled,
}

impl<T> SendError<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SendError::Cancelled)
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected(_) => write!(f, "Disconnected(..)"),
            SendError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected(_) => write!(f, "channel disconnected"),
            SendError::Cancelled => write!(f, "send cancelled"),
        }
    }
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.tx
            .send_async(item)
            .await
            .map_err(|e| SendError::Disconnected(e.into_inner()))
    }

    /// Send `item`, giving up as soon as `cancel` fires.
    ///
    /// A send that completes in the same poll as the cancellation wins, so an
    /// item the receiver already took is never reported as abandoned.
    pub async fn send_cancellable(
        &self,
        item: T,
        cancel: &CancellationToken,
    ) -> Result<(), SendError<T>> {
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }

        select! {
            biased;

            result = self.tx.send_async(item) => {
                result.map_err(|e| SendError::Disconnected(e.into_inner()))
            }
            // Dropping the pending send withdraws the item from the channel.
            _ = cancel.cancelled() => Err(SendError::Cancelled),
        }
    }

    /// Blocking send - blocks until the receiver has room for the item.
    /// Use this from non-async contexts (e.g., dedicated OS threads).
    pub fn send_blocking(&self, item: T) -> Result<(), SendError<T>> {
        self.tx
            .send(item)
            .map_err(|e| SendError::Disconnected(e.into_inner()))
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Like [`next`](Self::next), for receivers shared behind a reference.
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive - returns immediately.
    /// Returns None if no item is available or channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}

/// A zero-capacity channel: every send waits until the receiver takes the item.
pub fn rendezvous<T>() -> (BoundedSender<T>, BoundedReceiver<T>) {
    bounded(0)
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded, rendezvous};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn basics() {
        let (tx, mut rx) = bounded(3);

        let mut send1 = spawn(async { tx.send(10).await });
        let mut recv1 = spawn(async { rx.next().await });

        assert_pending!(recv1.poll());
        assert_ok!(assert_ready!(send1.poll()));
        assert!(recv1.is_woken());
        assert_eq!(Some(10), assert_ready!(recv1.poll()));

        drop(send1);
        drop(recv1);

        tx.send_blocking(11).unwrap();
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv(), Some(11));
        assert!(rx.is_empty());

        let mut recv2 = spawn(async { rx.next().await });
        drop(tx);
        assert_eq!(None, assert_ready!(recv2.poll()));
    }

    #[tokio::test]
    async fn rendezvous_send_waits_for_receiver() {
        let (tx, mut rx) = rendezvous();

        let mut send1 = spawn(async { tx.send(1).await });
        assert_pending!(send1.poll());

        let mut recv1 = spawn(async { rx.next().await });
        assert_eq!(Some(1), assert_ready!(recv1.poll()));
        assert_ok!(assert_ready!(send1.poll()));
    }

    #[tokio::test]
    async fn cancellable_send_abandons_item_on_cancel() {
        let (tx, rx) = rendezvous::<&str>();
        let cancel = CancellationToken::new();

        let mut send1 = spawn(async { tx.send_cancellable("line", &cancel).await });
        assert_pending!(send1.poll());

        cancel.cancel();
        let result = assert_ready!(send1.poll());
        assert_eq!(result, Err(SendError::Cancelled));

        // Nothing was left behind for the receiver.
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn cancellable_send_skips_when_already_cancelled() {
        let (tx, _rx) = bounded::<u32>(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tx.send_cancellable(7, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn sender_fails_on_rx_close() {
        let (tx, rx) = bounded(1);
        let cancel = CancellationToken::new();

        drop(rx);
        assert_eq!(
            tx.send_cancellable(10, &cancel).await,
            Err(SendError::Disconnected(10))
        );
    }
}
