//! In-process transport pair.
//!
//! Backs the crate's own tests and lets embedders drive an exchange without
//! any network in the way.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Sink, Stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{PollSendError, PollSender};

use crate::error::TransportError;

/// One side of a connected in-process transport pair.
///
/// Frames written to one side arrive on the other in order. Dropping or
/// closing a side ends the peer's stream, like a connection hanging up.
pub struct MemTransport {
    tx: PollSender<Bytes>,
    rx: ReceiverStream<Bytes>,
}

/// Create a connected pair of in-process transports.
///
/// `capacity` bounds the number of frames in flight per direction; a writer
/// blocks once its peer falls that far behind.
pub fn pair(capacity: usize) -> (MemTransport, MemTransport) {
    let (left_tx, left_rx) = mpsc::channel(capacity);
    let (right_tx, right_rx) = mpsc::channel(capacity);

    let left = MemTransport {
        tx: PollSender::new(left_tx),
        rx: ReceiverStream::new(right_rx),
    };
    let right = MemTransport {
        tx: PollSender::new(right_tx),
        rx: ReceiverStream::new(left_rx),
    };

    (left, right)
}

fn hangup<T>(_: PollSendError<T>) -> TransportError {
    TransportError::new(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))
}

impl Stream for MemTransport {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll_next(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Sink<Bytes> for MemTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().tx).poll_ready(cx).map_err(hangup)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().tx).start_send(item).map_err(hangup)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().tx).poll_flush(cx).map_err(hangup)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().tx).poll_close(cx).map_err(hangup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_frames_cross_in_both_directions() {
        let (mut left, mut right) = pair(8);

        left.send(Bytes::from_static(b"ping")).await.unwrap();
        let frame = right.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"ping"));

        right.send(Bytes::from_static(b"pong")).await.unwrap();
        let frame = left.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn test_dropped_side_ends_peer_stream() {
        let (left, mut right) = pair(8);
        drop(left);

        assert!(right.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_side_ends_peer_stream_after_drain() {
        let (mut left, mut right) = pair(8);

        left.send(Bytes::from_static(b"last")).await.unwrap();
        left.close().await.unwrap();

        let frame = right.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"last"));
        assert!(right.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_hung_up_peer_fails() {
        let (mut left, right) = pair(8);
        drop(right);

        // The channel may accept one buffered frame before the closed
        // receiver is observed, but a subsequent send must fail.
        let mut saw_error = false;
        for _ in 0..4 {
            if left.send(Bytes::from_static(b"x")).await.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }
}
