pub mod api;
pub mod config;
pub mod relay;

pub use api::{AppState, router};
pub use config::ServerConfig;
