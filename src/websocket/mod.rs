//! WebSocket module for Shellgate
//!
//! - /ws/terminal - interactive shell and script execution

pub mod terminal;

pub use terminal::terminal_handler;

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new().route("/ws/terminal", get(terminal_handler))
}
