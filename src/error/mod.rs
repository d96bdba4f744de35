use thiserror::Error;

/// Boxed error type returned by application callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Opaque failure raised by a transport read or write.
///
/// The hub never inspects the cause; it is carried for logging and for the
/// caller of a targeted send.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransportError {
    #[from]
    source: BoxError,
}

impl TransportError {
    /// Wrap an error produced by a transport implementation.
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Why a write to a session did not happen.
#[derive(Debug, Error)]
pub enum SendError {
    /// Teardown has begun for the session; nothing was written.
    #[error("connection closed")]
    Closed,

    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
