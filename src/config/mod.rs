mod settings;

pub use settings::{LogConfig, ServerConfig, Settings};
