mod app;
mod chat;
mod state;

pub use app::create_app;
pub use chat::{build_exchange, ChatMessage};
pub use state::AppState;
