//! Exchange counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters tracked over an exchange's lifetime.
#[derive(Debug, Default)]
pub struct ExchangeStats {
    /// Sessions registered
    pub sessions_opened: AtomicU64,
    /// Sessions fully torn down
    pub sessions_closed: AtomicU64,
    /// Inbound frames pulled off session transports
    pub messages_dispatched: AtomicU64,
    /// Broadcast calls issued
    pub broadcasts: AtomicU64,
    /// Failed writes, targeted and broadcast
    pub send_errors: AtomicU64,
}

impl ExchangeStats {
    pub fn snapshot(&self) -> ExchangeStatsSnapshot {
        ExchangeStatsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ExchangeStats`].
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeStatsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub messages_dispatched: u64,
    pub broadcasts: u64,
    pub send_errors: u64,
}
