use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::exchange::Exchange;

use super::chat;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub exchange: Arc<Exchange<WebSocket>>,
    /// Root token; each connection gets a child, so one cancel winds
    /// everything down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let exchange = chat::build_exchange();

        Self {
            settings: Arc::new(settings),
            exchange,
            shutdown: CancellationToken::new(),
        }
    }
}
