//! Session handle: one registered connection's identity, write lock, and
//! closed signal.

use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::transport::TransportSink;

/// Process-unique session identifier, assigned by the exchange at
/// registration. Strictly increasing, never reused.
pub type SessionId = u64;

/// Handle for a single live connection.
///
/// Shared as `Arc<Session>`; every method takes `&self` and is safe to call
/// from any task. Writes are serialized through an internal lock so each
/// payload goes out as one whole frame, never interleaved with another
/// writer's. The closed signal doubles as an interrupt: a writer parked on
/// a full peer window is unseated the moment teardown begins, so closing
/// never waits on a stalled receiver.
pub struct Session {
    id: SessionId,
    sink: Mutex<Option<TransportSink>>,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: SessionId, sink: TransportSink) -> Self {
        Self {
            id,
            sink: Mutex::new(Some(sink)),
            closed: CancellationToken::new(),
        }
    }

    /// Identifier for targeted sends, stable for the session's lifetime.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether teardown has begun for this session.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Write one payload to the connection as a single frame.
    ///
    /// Fails fast with [`SendError::Closed`] once teardown has begun,
    /// without touching the transport. A call already parked on transport
    /// backpressure is interrupted with the same error when teardown
    /// begins, instead of holding the write lock against it.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let mut guard = self.sink.lock().await;
        // Teardown may have started while this writer waited for the lock.
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let Some(sink) = guard.as_mut() else {
            return Err(SendError::Closed);
        };

        tokio::select! {
            result = sink.send(payload.into()) => {
                result?;
                Ok(())
            }
            _ = self.closed.cancelled() => Err(SendError::Closed),
        }
    }

    /// Run `f` with exclusive access to the raw write half.
    ///
    /// Holds the write lock for the duration of `f`, so concurrent `send`
    /// calls wait and multi-step sink operations stay atomic per session.
    /// Like `send`, the call is abandoned with [`SendError::Closed`] if
    /// teardown begins while `f` runs.
    pub async fn with_sink<R>(
        &self,
        f: impl for<'a> FnOnce(&'a mut TransportSink) -> BoxFuture<'a, R>,
    ) -> Result<R, SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let mut guard = self.sink.lock().await;
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let Some(sink) = guard.as_mut() else {
            return Err(SendError::Closed);
        };

        tokio::select! {
            value = f(sink) => Ok(value),
            _ = self.closed.cancelled() => Err(SendError::Closed),
        }
    }

    /// Close the connection's write half.
    ///
    /// Trips the closed signal, unseating any parked writer, then drops the
    /// write half outright rather than awaiting a flush the peer may never
    /// drain; the transport itself ends once the read half lets go. Safe to
    /// call more than once.
    pub async fn close(&self) {
        self.closed.cancel();
        drop(self.sink.lock().await.take());
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{boxed, mem};

    use std::time::Duration;

    use futures::StreamExt;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task};

    fn session_with_peer(id: SessionId) -> (Session, mem::MemTransport) {
        let (local, peer) = mem::pair(8);
        let (sink, _stream) = boxed(local).split();
        (Session::new(id, sink), peer)
    }

    #[tokio::test]
    async fn test_send_delivers_one_frame() {
        let (session, mut peer) = session_with_peer(7);
        assert_eq!(session.id(), 7);

        assert_ok!(session.send("hello").await);

        let frame = peer.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails_without_writing() {
        let (session, mut peer) = session_with_peer(1);
        session.mark_closed();

        let result = session.send("late").await;
        assert!(matches!(result, Err(SendError::Closed)));
        assert!(session.is_closed());

        // Nothing must have reached the transport.
        let received = timeout(Duration::from_millis(50), peer.next()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_with_sink_batches_frames() {
        let (session, mut peer) = session_with_peer(1);

        session
            .with_sink(|sink| {
                Box::pin(async move {
                    sink.feed(Bytes::from_static(b"one")).await?;
                    sink.feed(Bytes::from_static(b"two")).await?;
                    sink.flush().await
                })
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(peer.next().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(peer.next().await.unwrap().unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_with_sink_excludes_concurrent_sends() {
        let (session, mut peer) = session_with_peer(1);
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        // Park the closure mid-batch so it holds the sink open.
        let mut batch = task::spawn(session.with_sink(move |sink| {
            Box::pin(async move {
                sink.feed(Bytes::from_static(b"one")).await?;
                let _ = gate_rx.await;
                sink.feed(Bytes::from_static(b"two")).await?;
                sink.flush().await
            })
        }));
        assert_pending!(batch.poll());

        // A concurrent send cannot enter while the closure runs.
        let mut send = task::spawn(session.send("concurrent"));
        assert_pending!(send.poll());

        gate_tx.send(()).unwrap();
        assert_ready!(batch.poll()).unwrap().unwrap();
        assert_ready!(send.poll()).unwrap();

        // The batched frames went out before the excluded send's frame.
        for expected in ["one", "two", "concurrent"] {
            let frame = peer.next().await.unwrap().unwrap();
            assert_eq!(frame, Bytes::from(expected));
        }
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (session, mut peer) = session_with_peer(1);

        session.close().await;
        assert!(peer.next().await.is_none());
        assert!(matches!(session.send("late").await, Err(SendError::Closed)));

        // Double close must not panic.
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_interrupts_a_writer_parked_on_backpressure() {
        let (local, _peer) = mem::pair(1);
        let (sink, _stream) = boxed(local).split();
        let session = Session::new(1, sink);

        assert_ok!(session.send("fills the window").await);

        // The window is full and nobody is draining it, so this writer
        // parks inside the lock.
        let mut parked = task::spawn(session.send("parked"));
        assert_pending!(parked.poll());

        // Close must not wait behind the parked writer.
        let mut close = task::spawn(session.close());
        assert_pending!(close.poll());

        assert!(parked.is_woken());
        assert!(matches!(
            assert_ready!(parked.poll()),
            Err(SendError::Closed)
        ));
        assert_ready!(close.poll());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_send_to_hung_up_peer_reports_transport_error() {
        let (session, peer) = session_with_peer(1);
        drop(peer);

        let mut saw_transport_error = false;
        for _ in 0..4 {
            if let Err(SendError::Transport(_)) = session.send("x").await {
                saw_transport_error = true;
                break;
            }
        }
        assert!(saw_transport_error);
    }
}
