//! WebSocket transport adapter for axum connections.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, Stream};

use crate::error::TransportError;

/// Wrap an upgraded axum [`WebSocket`] so the hub can drive it.
///
/// Inbound text and binary frames surface as payloads; ping and pong frames
/// are answered by axum and skipped here. An inbound close frame ends the
/// stream. Outbound payloads go out as binary frames.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Stream for WsTransport {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(Pin::new(&mut this.socket).poll_next(cx)) {
                Some(Ok(msg)) => match msg {
                    Message::Text(_) | Message::Binary(_) => {
                        return Poll::Ready(Some(Ok(msg.into_data())));
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => return Poll::Ready(None),
                },
                Some(Err(e)) => return Poll::Ready(Some(Err(TransportError::new(e)))),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Sink<Bytes> for WsTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().socket)
            .poll_ready(cx)
            .map_err(TransportError::new)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().socket)
            .start_send(Message::Binary(item))
            .map_err(TransportError::new)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().socket)
            .poll_flush(cx)
            .map_err(TransportError::new)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().socket)
            .poll_close(cx)
            .map_err(TransportError::new)
    }
}
