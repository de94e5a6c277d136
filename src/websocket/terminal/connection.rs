use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use shellgate_core::{ClientEvent, EventSink, Gateway, ServerEvent};

/// Max time without receiving a message before considering the connection dead.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
/// How often to send server-side pings.
pub const PING_INTERVAL_SECS: u64 = 30;

/// Main terminal connection handler.
pub async fn handle_terminal(socket: WebSocket, gateway: Arc<Gateway>) {
    let (ws_tx, ws_rx) = socket.split();
    serve_client(ws_tx, ws_rx, gateway).await;
}

/// Drive one client until its transport goes away, then tear down its
/// session and jobs.
pub async fn serve_client<W, R>(mut ws_tx: W, mut ws_rx: R, gateway: Arc<Gateway>)
where
    W: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (sink, mut events) = EventSink::channel();
    let mut client = gateway.attach(sink);
    let client_id = client.id();
    info!(client_id = %client_id, "Terminal WS connection opened");

    let ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    tokio::pin!(ping_interval);

    let mut last_recv = tokio::time::Instant::now();
    let heartbeat_timeout = tokio::time::Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);

    loop {
        tokio::select! {
            // Client message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_recv = tokio::time::Instant::now();
                        client.handle_text(&text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_recv = tokio::time::Instant::now();
                        client.handle(ClientEvent::Input(data)).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_recv = tokio::time::Instant::now();
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_recv = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "Terminal WS error");
                        break;
                    }
                }
            }
            // Session and job events → forward to client
            event = events.recv() => {
                let Some(event) = event else { break };
                client.observe(&event).await;
                if ws_tx.send(encode(&event)).await.is_err() {
                    debug!(client_id = %client_id, event = event.name(), "Send failed, closing");
                    break;
                }
            }
            // Server ping (WS protocol level)
            _ = ping_interval.tick() => {
                if last_recv.elapsed() > heartbeat_timeout {
                    info!(client_id = %client_id, "Heartbeat timeout, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }

    client.close().await;
    let _ = ws_tx.send(Message::Close(None)).await;
    info!(client_id = %client_id, "Terminal WS connection closed");
}

/// Serialize an outbound event as a text frame.
pub fn encode(event: &ServerEvent) -> Message {
    Message::Text(serde_json::to_string(event).unwrap_or_default())
}
