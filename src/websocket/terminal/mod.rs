//! Terminal WebSocket handler.
//!
//! One connection is one gateway client. Text frames carry
//! `{"event", "data"}` JSON; binary frames are raw shell input.

pub mod connection;


use axum::{extract::ws::WebSocketUpgrade, response::IntoResponse, Extension};
use connection::handle_terminal;
use shellgate_core::Gateway;
use std::sync::Arc;

/// Maximum size of a single WS message (1 MB).
const MAX_MESSAGE_BYTES: usize = 1_048_576;

/// WebSocket upgrade handler for `/ws/terminal`.
pub async fn terminal_handler(
    ws: WebSocketUpgrade,
    Extension(gateway): Extension<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_terminal(socket, gateway))
}
