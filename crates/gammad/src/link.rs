//! Worker links - full-duplex message channels between the supervisor
//! and each worker.
//!
//! A link is a pair of bounded mpsc channels, one per direction. Messages
//! are FIFO within one link; no ordering holds across links. Closure of
//! either half acts as the close sentinel: `recv` returns `None` and
//! `send` fails with [`LinkClosed`], which both ends treat as a shutdown
//! signal rather than an error to escalate.

use gamma_protocol::Message;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default per-direction channel capacity.
///
/// The supervisor drains promptly; this only has to absorb a burst of
/// replayed records during `dump_session`.
pub const LINK_CAPACITY: usize = 64;

/// The other end of the link has shut down.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("worker link closed")]
pub struct LinkClosed;

/// One end of a full-duplex supervisor/worker channel.
pub struct WorkerLink {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

impl WorkerLink {
    /// Creates a connected pair of link ends.
    pub fn pair() -> (WorkerLink, WorkerLink) {
        let (a_tx, a_rx) = mpsc::channel(LINK_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(LINK_CAPACITY);
        (
            WorkerLink { tx: a_tx, rx: b_rx },
            WorkerLink { tx: b_tx, rx: a_rx },
        )
    }

    /// Sends a message to the other end, waiting for capacity.
    pub async fn send(&self, msg: Message) -> Result<(), LinkClosed> {
        self.tx.send(msg).await.map_err(|_| LinkClosed)
    }

    /// Receives the next message; `None` is the close sentinel.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Non-blocking poll of the inbound queue.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamma_protocol::tags;

    #[tokio::test]
    async fn test_fifo_within_link() {
        let (a, mut b) = WorkerLink::pair();
        a.send(Message::new(tags::PING).with("seq", 1)).await.unwrap();
        a.send(Message::new(tags::PING).with("seq", 2)).await.unwrap();

        assert_eq!(b.recv().await.unwrap().get_u64("seq"), Some(1));
        assert_eq!(b.recv().await.unwrap().get_u64("seq"), Some(2));
    }

    #[tokio::test]
    async fn test_full_duplex() {
        let (mut a, mut b) = WorkerLink::pair();
        a.send(Message::new(tags::PING)).await.unwrap();
        b.send(Message::new(tags::PING_OK)).await.unwrap();

        assert_eq!(b.recv().await.unwrap().command, tags::PING);
        assert_eq!(a.recv().await.unwrap().command, tags::PING_OK);
    }

    #[tokio::test]
    async fn test_drop_is_close_sentinel() {
        let (a, mut b) = WorkerLink::pair();
        drop(a);
        assert!(b.recv().await.is_none());
        assert_eq!(b.send(Message::new(tags::CLOSE)).await, Err(LinkClosed));
    }
}
