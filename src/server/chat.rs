//! Single-room chat relay wired onto the exchange.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::exchange::Exchange;
use crate::transport::{boxed, ws::WsTransport};

/// A single chat message, relayed to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Stamped by the server, milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    pub sender: String,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            sender: "system".to_string(),
            text: text.into(),
        }
    }

    pub fn to_json(&self) -> Result<Bytes, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.into())
    }
}

/// Build an exchange whose callbacks implement one shared chat room: greet
/// each new session, then stamp and rebroadcast every inbound message.
pub fn build_exchange() -> Arc<Exchange<WebSocket>> {
    let exchange = Arc::new(Exchange::new());

    exchange.on_upgrade(|socket: WebSocket| async move { Ok(boxed(WsTransport::new(socket))) });

    exchange.on_connect(|session| async move {
        tracing::info!(session_id = session.id(), "Chat client connected");
        let greeting = ChatMessage::system("connected").to_json()?;
        session.send(greeting).await?;
        Ok(())
    });

    {
        let hub = exchange.clone();
        exchange.on_message(move |_session, payload| {
            let hub = hub.clone();
            async move {
                let mut message: ChatMessage = serde_json::from_slice(&payload)?;
                message.timestamp = Utc::now().timestamp_millis();
                hub.broadcast(&[], message.to_json()?).await;
                Ok(())
            }
        });
    }

    exchange.on_close(|session| async move {
        tracing::info!(session_id = session.id(), "Chat client disconnected");
        Ok(())
    });

    exchange
}
