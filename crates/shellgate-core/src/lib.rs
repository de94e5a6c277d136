//! Shellgate Core - Remote Session Gateway
//!
//! This crate holds everything between the WebSocket and the SSH client:
//! - Probe: TCP reachability check before the handshake
//! - Session: per-client interactive shell task and its state machine
//! - Registry: process-wide client → session table
//! - Exec: one-shot script execution on the target or the gateway host
//! - Events: the JSON wire protocol spoken with the browser
//! - Transport: the traits an SSH implementation plugs into

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod exec;
pub mod gateway;
pub mod probe;
pub mod registry;
pub mod session;
pub mod target;
pub mod transport;

pub use config::{ExecutionConfig, GatewayConfig, PtyConfig};
pub use error::{format_error_for_status, Error, NetworkCause, Result, UserFriendlyError};
pub use events::{
    ClientEvent, CloseReason, ConnectionStatus, EventSink, ExecutionRequest, OutputStream,
    ServerEvent, Utf8Decoder,
};
pub use exec::{Executor, Language};
pub use gateway::{ClientConnection, Gateway};
pub use probe::{probe, ProbeOutcome, Prober, DEFAULT_PROBE_TIMEOUT};
pub use registry::{ClientId, SessionRegistry};
pub use session::{Session, SessionCommand, SessionHandle, SessionRef, SessionState};
pub use target::{Credential, TargetDescriptor, DEFAULT_SSH_PORT};
pub use transport::{
    ChannelEvent, Connector, PtyRequest, PtySize, RemoteChannel, RemoteConnection,
};
