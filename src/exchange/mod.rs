//! Session registry and connection lifecycle orchestration.

mod stats;

pub use stats::{ExchangeStats, ExchangeStatsSnapshot};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, SendError};
use crate::session::{Session, SessionId};
use crate::transport::{BoxTransport, TransportSink};

type HandlerSlot<T> = parking_lot::RwLock<Option<T>>;

type UpgradeHandler<R> =
    Arc<dyn Fn(R) -> BoxFuture<'static, Result<BoxTransport, BoxError>> + Send + Sync>;
type SessionHandler =
    Arc<dyn Fn(Arc<Session>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type MessageHandler =
    Arc<dyn Fn(Arc<Session>, Bytes) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// The hub: a registry of live sessions plus the lifecycle and fan-out
/// logic that maintains it.
///
/// Generic over the raw connection request type `R` handed to the upgrade
/// callback: an upgraded socket for a real server, a bare transport in
/// tests. Multiple independent exchanges can coexist in one process, each
/// with its own registry and ID space.
pub struct Exchange<R> {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    id_counter: AtomicU64,
    upgrade_handler: HandlerSlot<UpgradeHandler<R>>,
    connect_handler: HandlerSlot<SessionHandler>,
    message_handler: HandlerSlot<MessageHandler>,
    close_handler: HandlerSlot<SessionHandler>,
    stats: Arc<ExchangeStats>,
}

impl<R> Exchange<R> {
    /// Create an empty exchange. Session IDs start at 1 and are never
    /// reused, even after the session they belonged to closes.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            upgrade_handler: HandlerSlot::default(),
            connect_handler: HandlerSlot::default(),
            message_handler: HandlerSlot::default(),
            close_handler: HandlerSlot::default(),
            stats: Arc::new(ExchangeStats::default()),
        }
    }

    /// Register the callback that turns a raw request into a transport.
    ///
    /// Required: without it every incoming connection is dropped before a
    /// session exists. Replaces any previously registered callback.
    pub fn on_upgrade<F, Fut>(&self, callback: F)
    where
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxTransport, BoxError>> + Send + 'static,
    {
        let handler: UpgradeHandler<R> = Arc::new(move |request| Box::pin(callback(request)));
        *self.upgrade_handler.write() = Some(handler);
    }

    /// Register the callback run right after a session is registered.
    ///
    /// An error here rejects the connection: the read loop never starts and
    /// teardown runs immediately, close callback included.
    pub fn on_connect<F, Fut>(&self, callback: F)
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: SessionHandler = Arc::new(move |session| Box::pin(callback(session)));
        *self.connect_handler.write() = Some(handler);
    }

    /// Register the callback run for each inbound frame.
    ///
    /// Errors are logged and the read loop continues; a bad message never
    /// closes the connection.
    pub fn on_message<F, Fut>(&self, callback: F)
    where
        F: Fn(Arc<Session>, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: MessageHandler =
            Arc::new(move |session, payload| Box::pin(callback(session, payload)));
        *self.message_handler.write() = Some(handler);
    }

    /// Register the callback run at the start of teardown.
    ///
    /// The session is still registered when it runs, and on every path
    /// except cancellation still writable, so a farewell frame can go out.
    /// Errors are logged and never block teardown.
    pub fn on_close<F, Fut>(&self, callback: F)
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: SessionHandler = Arc::new(move |session| Box::pin(callback(session)));
        *self.close_handler.write() = Some(handler);
    }

    /// Drive one connection from upgrade to teardown.
    ///
    /// Runs until the transport ends, a read fails, the connect callback
    /// rejects the session, or `cancel` fires. Every one of those paths
    /// converges on the same teardown, exactly once: close callback, closed
    /// flag, registry removal, transport close. Callers spawn one task per
    /// connection around this future and drive it to completion.
    #[tracing::instrument(name = "exchange.connection", skip(self, request, cancel))]
    pub async fn manage_connection(&self, request: R, cancel: CancellationToken) {
        let Some(upgrade) = self.upgrade_handler.read().clone() else {
            tracing::warn!("No upgrade callback registered, dropping connection");
            return;
        };

        let transport = match upgrade(request).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(error = %e, "Connection upgrade failed");
                return;
            }
        };

        let (sink, mut stream) = transport.split();
        let session = self.register(sink).await;
        let session_id = session.id();

        tracing::info!(session_id = session_id, "Session registered");

        let connect_handler = self.connect_handler.read().clone();
        let connected = match connect_handler {
            Some(handler) => handler(session.clone()).await,
            None => Ok(()),
        };

        if let Err(e) = connected {
            tracing::warn!(
                session_id = session_id,
                error = %e,
                "Connect callback rejected session"
            );
            self.teardown(&session).await;
            return;
        }

        // Flip the closed flag the moment cancellation lands, so writers
        // fail fast even while this task sits between reads.
        let watcher = {
            let cancel = cancel.clone();
            let session = session.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                session.mark_closed();
            })
        };

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = session_id, "Connection cancelled");
                    break;
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(payload)) => {
                    self.stats.messages_dispatched.fetch_add(1, Ordering::Relaxed);

                    let message_handler = self.message_handler.read().clone();
                    if let Some(handler) = message_handler {
                        if let Err(e) = handler(session.clone(), payload).await {
                            tracing::warn!(
                                session_id = session_id,
                                error = %e,
                                "Message callback failed"
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(session_id = session_id, error = %e, "Transport read failed");
                    break;
                }
                None => {
                    tracing::debug!(session_id = session_id, "Transport closed by peer");
                    break;
                }
            }
        }

        watcher.abort();
        self.teardown(&session).await;
    }

    /// Send one payload to one session by ID.
    ///
    /// An unknown ID is a silent no-op: the target may have disconnected
    /// between the caller learning the ID and the send. The registry lock is
    /// held only for the lookup, never during the write.
    #[tracing::instrument(name = "exchange.send", skip(self, id, payload), fields(session_id = id))]
    pub async fn send(&self, id: SessionId, payload: impl Into<Bytes>) -> Result<(), SendError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(&id).cloned()
        };

        let Some(session) = session else {
            return Ok(());
        };

        let result = session.send(payload).await;
        if result.is_err() {
            self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Fan a payload out to many sessions.
    ///
    /// An empty `ids` slice targets every registered session; unknown IDs
    /// are skipped. The target set is the registry snapshot at the moment of
    /// the lookup, so sessions registered afterwards receive nothing.
    /// Delivery is fire-and-forget: one task per target, failures logged,
    /// nothing reported back, and one stuck receiver never delays the rest.
    #[tracing::instrument(
        name = "exchange.broadcast",
        skip(self, ids, payload),
        fields(target_count = ids.len())
    )]
    pub async fn broadcast(&self, ids: &[SessionId], payload: impl Into<Bytes>) {
        let payload = payload.into();

        let targets: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            if ids.is_empty() {
                sessions.values().cloned().collect()
            } else {
                ids.iter().filter_map(|id| sessions.get(id).cloned()).collect()
            }
        };

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        for session in targets {
            let payload = payload.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = session.send(payload).await {
                    stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        session_id = session.id(),
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            });
        }
    }

    /// Number of currently registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Counters accumulated since this exchange was created.
    pub fn stats(&self) -> ExchangeStatsSnapshot {
        self.stats.snapshot()
    }

    async fn register(&self, sink: TransportSink) -> Arc<Session> {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, sink));

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, session.clone());
        }

        self.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
        session
    }

    /// Tear a session down: close callback, closed flag, registry removal,
    /// transport close, in that order.
    async fn teardown(&self, session: &Arc<Session>) {
        let session_id = session.id();

        let close_handler = self.close_handler.read().clone();
        if let Some(handler) = close_handler {
            if let Err(e) = handler(session.clone()).await {
                tracing::warn!(session_id = session_id, error = %e, "Close callback failed");
            }
        }

        session.mark_closed();

        {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&session_id);
        }

        session.close().await;
        self.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);

        tracing::info!(session_id = session_id, "Session closed");
    }
}

impl<R> Default for Exchange<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{boxed, mem};

    use std::sync::atomic::AtomicUsize;

    fn test_sink() -> TransportSink {
        let (local, _peer) = mem::pair(8);
        let (sink, _stream) = boxed(local).split();
        sink
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increment() {
        let exchange = Exchange::<BoxTransport>::new();

        let first = exchange.register(test_sink()).await;
        let second = exchange.register(test_sink()).await;
        let third = exchange.register(test_sink()).await;

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(third.id(), 3);
        assert_eq!(exchange.session_count().await, 3);
    }

    #[tokio::test]
    async fn test_send_to_unknown_id_is_silent_noop() {
        let exchange = Exchange::<BoxTransport>::new();

        assert!(exchange.send(42, "nobody home").await.is_ok());
        assert_eq!(exchange.stats().send_errors, 0);
    }

    #[tokio::test]
    async fn test_handler_registration_last_wins() {
        let exchange = Exchange::<BoxTransport>::new();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = first_calls.clone();
            exchange.on_message(move |_session, _payload| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(()) }
            });
        }
        {
            let calls = second_calls.clone();
            exchange.on_message(move |_session, _payload| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(()) }
            });
        }

        let session = exchange.register(test_sink()).await;
        let handler = exchange.message_handler.read().clone().unwrap();
        handler(session, Bytes::from_static(b"frame")).await.unwrap();

        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_sessions_is_harmless() {
        let exchange = Exchange::<BoxTransport>::new();

        exchange.broadcast(&[], "into the void").await;

        assert_eq!(exchange.stats().broadcasts, 1);
        assert_eq!(exchange.stats().send_errors, 0);
    }
}
