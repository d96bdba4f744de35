//! Minimal real-time connection hub.
//!
//! The hub accepts upgraded bidirectional message-stream connections, tracks
//! each as an addressable [`Session`], and sends one payload to one session
//! or broadcasts to many. The upgrade handshake and the message encoding
//! stay with the caller, supplied as callbacks on an [`Exchange`]; the hub
//! owns the registry and its concurrency-safe send, broadcast, and teardown
//! protocol.

// Core hub
pub mod error;
pub mod exchange;
pub mod session;
pub mod transport;

// Demo chat relay
pub mod config;
pub mod server;

pub use error::{BoxError, SendError, TransportError};
pub use exchange::{Exchange, ExchangeStats, ExchangeStatsSnapshot};
pub use session::{Session, SessionId};
pub use transport::{boxed, BoxTransport, Transport, TransportSink, TransportStream};
