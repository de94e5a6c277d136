//! Terminal wire protocol
//!
//! Every WebSocket text frame is one JSON object `{"event": "...", "data": ...}`.
//! [`ClientEvent`] is what the browser sends, [`ServerEvent`] is what the
//! gateway sends back. Session and job tasks push [`ServerEvent`]s into an
//! [`EventSink`]; the connection loop drains it into the socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::target::TargetDescriptor;
use crate::transport::PtySize;

/// Progress of a connection attempt, as shown in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Probe or handshake in flight
    Testing,
    /// Shell (or test connection) established
    Connected,
    /// The attempt failed
    Error,
}

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// The remote shell exited or closed its channel
    RemoteClosed,
    /// The browser went away
    ClientDisconnected,
    /// A newer `start-session` replaced this one
    Superseded,
    /// The client sent `close-session`
    ClientRequest,
    /// Connection, authentication or transport failure
    Error,
    /// The gateway process is stopping
    Shutdown,
}

impl CloseReason {
    /// Wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::RemoteClosed => "remote-closed",
            CloseReason::ClientDisconnected => "client-disconnected",
            CloseReason::Superseded => "superseded",
            CloseReason::ClientRequest => "client-request",
            CloseReason::Error => "error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Gateway → client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent once when the client attaches
    Connected {
        /// Identity of this client connection
        client_id: String,
    },
    /// Connection attempt progress
    ConnectionStatus {
        /// Phase
        status: ConnectionStatus,
        /// Human readable detail
        message: String,
    },
    /// Shell output, or job output when `job_id` is set
    Output {
        /// Decoded text
        data: String,
        /// Job stream; absent for the interactive shell
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream: Option<OutputStream>,
        /// Owning job; absent for the interactive shell
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    /// A session ended. Sent exactly once per session.
    SessionClosed {
        /// Session that ended
        session_id: String,
        /// Why it ended
        reason: CloseReason,
    },
    /// A job's command was launched
    ExecutionStarted {
        /// Job id
        job_id: String,
        /// Canonical language name
        language: String,
        /// Whether it runs on the session target
        remote: bool,
    },
    /// A job finished
    ExecutionExit {
        /// Job id
        job_id: String,
        /// Exit code, if the process reported one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        /// Signal name, if the process was killed by one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },
    /// A job could not be started or lost its transport
    ExecutionError {
        /// Job id
        job_id: String,
        /// Human readable reason
        message: String,
    },
    /// A frame the gateway could not act on
    Error {
        /// Human readable reason
        message: String,
        /// Machine readable code
        code: String,
    },
    /// Reply to `ping`
    Pong,
}

impl ServerEvent {
    /// Build a `connection-status` event.
    pub fn status(status: ConnectionStatus, message: impl Into<String>) -> Self {
        Self::ConnectionStatus {
            status,
            message: message.into(),
        }
    }

    /// Build an `error` event from a core error.
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            message: error.to_string(),
            code: error.code().to_string(),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::ConnectionStatus { .. } => "connection-status",
            ServerEvent::Output { .. } => "output",
            ServerEvent::SessionClosed { .. } => "session-closed",
            ServerEvent::ExecutionStarted { .. } => "execution-started",
            ServerEvent::ExecutionExit { .. } => "execution-exit",
            ServerEvent::ExecutionError { .. } => "execution-error",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

/// Payload of `run-command`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    /// Source code, written to the temp file verbatim
    pub code: String,
    /// Language tag; unknown or missing runs as bash
    #[serde(default)]
    pub language: Option<String>,
    /// Run on the session target (`true`) or the gateway host
    #[serde(default = "default_remote")]
    pub remote: bool,
}

fn default_remote() -> bool {
    true
}

#[derive(Deserialize)]
struct ResizePayload {
    cols: u32,
    rows: u32,
}

/// Client → gateway events.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Open (or replace) this client's shell session
    StartSession(TargetDescriptor),
    /// Keystrokes for the active shell
    Input(Vec<u8>),
    /// Window change for the active shell
    Resize(PtySize),
    /// Start an execution job
    RunCommand(ExecutionRequest),
    /// Probe and authenticate without opening a shell
    TestConnection(Option<TargetDescriptor>),
    /// Tear down the current session
    CloseSession,
    /// Application-level keep-alive
    Ping,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let frame: RawFrame = serde_json::from_str(text)
            .map_err(|e| Error::InvalidRequest(format!("malformed frame: {}", e)))?;

        let event = match frame.event.as_str() {
            "start-session" => ClientEvent::StartSession(payload(&frame.event, frame.data)?),
            "input" => match frame.data {
                Value::String(s) => ClientEvent::Input(s.into_bytes()),
                _ => {
                    return Err(Error::InvalidRequest(
                        "input payload must be a string".to_string(),
                    ))
                }
            },
            "resize" => {
                let size: ResizePayload = payload(&frame.event, frame.data)?;
                if size.cols == 0 || size.rows == 0 {
                    return Err(Error::InvalidRequest(
                        "resize needs non-zero cols and rows".to_string(),
                    ));
                }
                ClientEvent::Resize(PtySize {
                    cols: size.cols,
                    rows: size.rows,
                })
            }
            "run-command" => ClientEvent::RunCommand(payload(&frame.event, frame.data)?),
            "test-connection" => ClientEvent::TestConnection(payload(&frame.event, frame.data)?),
            "close-session" => ClientEvent::CloseSession,
            "ping" => ClientEvent::Ping,
            other => {
                return Err(Error::InvalidRequest(format!("unknown event '{}'", other)));
            }
        };
        Ok(event)
    }
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::InvalidRequest(format!("invalid {} payload: {}", event, e)))
}

/// Cloneable sender for outbound events.
///
/// Unbounded so that session and job tasks never wait on a slow client.
/// Sending after the client went away is silently dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl EventSink {
    /// Wrap a sender.
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver the connection loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Queue an event.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    /// Queue a `connection-status` event.
    pub fn status(&self, status: ConnectionStatus, message: impl Into<String>) {
        self.emit(ServerEvent::status(status, message));
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Incremental UTF-8 decoder.
///
/// Holds back an incomplete trailing sequence until the next chunk arrives.
/// Bytes that can never form a valid sequence become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `chunk` (plus any held-back bytes) as possible.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }
}
