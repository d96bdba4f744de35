//! Transport seam between the hub and concrete connection types.
//!
//! A transport is anything that is a [`Stream`] of inbound frames and a
//! [`Sink`] of outbound frames, one opaque `Bytes` payload per frame. The
//! upgrade callback hands the hub a [`BoxTransport`]; the hub splits it and
//! owns both halves for the life of the session.

use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, Stream};

use crate::error::TransportError;

pub mod mem;
pub mod ws;

/// A bidirectional, frame-oriented message transport.
///
/// Blanket-implemented; implement `Stream` and `Sink` with these item and
/// error types and the trait comes for free.
pub trait Transport:
    Stream<Item = Result<Bytes, TransportError>> + Sink<Bytes, Error = TransportError> + Send
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Bytes, TransportError>> + Sink<Bytes, Error = TransportError> + Send
{
}

/// Boxed transport, as produced by an upgrade callback.
pub type BoxTransport = Pin<Box<dyn Transport>>;

/// Write half of a split [`BoxTransport`].
pub type TransportSink = SplitSink<BoxTransport, Bytes>;

/// Read half of a split [`BoxTransport`].
pub type TransportStream = SplitStream<BoxTransport>;

/// Box a concrete transport for handoff to the hub.
pub fn boxed<T>(transport: T) -> BoxTransport
where
    T: Transport + 'static,
{
    Box::pin(transport)
}
