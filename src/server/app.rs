use axum::{
    extract::{State, WebSocketUpgrade},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Chat page
        .route("/", get(index_handler))
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Hub counters
        .route("/stats", get(stats_handler))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

/// WebSocket upgrade handler
#[tracing::instrument(name = "relay.upgrade", skip(ws, state))]
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let cancel = state.shutdown.child_token();
        state.exchange.manage_connection(socket, cancel).await;
    })
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.exchange.stats())
}
