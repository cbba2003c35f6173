//! Serialized, close-once writer over the response channel.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::protocol::{encode_ping, Frame};

/// Writes whole frames into the response body channel.
///
/// Every write holds the sender lock for the duration of the send, so a ping
/// can never land between the bytes of a frame. After [`close`](Self::close)
/// all writes are discarded.
pub struct FrameWriter {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
    activity: AtomicBool,
    disconnect: CancellationToken,
}

impl FrameWriter {
    /// `disconnect` is cancelled when the receiving side has gone away.
    pub fn new(sender: mpsc::Sender<Bytes>, disconnect: CancellationToken) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
            activity: AtomicBool::new(false),
            disconnect,
        }
    }

    /// Write one frame. Returns false when the write was discarded.
    pub async fn write_frame(&self, frame: &Frame) -> bool {
        self.write(frame.encode(), true).await
    }

    /// Write a keep-alive comment. Pings do not count as activity.
    pub async fn write_ping(&self) -> bool {
        self.write(encode_ping(), false).await
    }

    async fn write(&self, bytes: Bytes, counts_as_activity: bool) -> bool {
        if self.is_closed() {
            return false;
        }
        let guard = self.sender.lock().await;
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.send(bytes).await {
            Ok(()) => {
                if counts_as_activity {
                    self.activity.store(true, Ordering::Release);
                }
                true
            }
            Err(_) => {
                tracing::debug!("response receiver dropped");
                self.disconnect.cancel();
                false
            }
        }
    }

    /// Whether a frame was written since the last call.
    pub fn take_activity(&self) -> bool {
        self.activity.swap(false, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Latch the writer closed and release the channel. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_after_close_are_discarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let writer = FrameWriter::new(tx, CancellationToken::new());
        assert!(writer.write_frame(&Frame::token("a")).await);
        writer.close().await;
        writer.close().await;
        assert!(!writer.write_frame(&Frame::token("b")).await);
        assert!(!writer.write_ping().await);

        assert_eq!(rx.recv().await.unwrap(), Frame::token("a").encode());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_disconnect_token() {
        let (tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let writer = FrameWriter::new(tx, token.clone());
        drop(rx);
        assert!(!writer.write_frame(&Frame::token("a")).await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn pings_are_not_activity() {
        let (tx, _rx) = mpsc::channel(4);
        let writer = FrameWriter::new(tx, CancellationToken::new());
        assert!(writer.write_ping().await);
        assert!(!writer.take_activity());
        assert!(writer.write_frame(&Frame::done("t")).await);
        assert!(writer.take_activity());
        assert!(!writer.take_activity());
    }
}
