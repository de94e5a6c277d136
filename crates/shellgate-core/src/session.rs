//! Shell Session Manager
//!
//! Each session is one task that owns the SSH connection and the shell
//! channel. Everything else talks to it through [`SessionCommand`]s and a
//! cancellation token, and observes it through a `watch` of its
//! [`SessionState`].
//!
//! ```text
//! Idle -> Probing -> Authenticating -> Ready <-> Streaming -> Closed
//!            \             \             \          /
//!             +-------------+-------------+-> Error -> Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{format_error_for_status, Error, NetworkCause, Result};
use crate::events::{CloseReason, ConnectionStatus, EventSink, ServerEvent, Utf8Decoder};
use crate::probe::Prober;
use crate::target::TargetDescriptor;
use crate::transport::{
    ChannelEvent, Connector, PtyRequest, PtySize, RemoteChannel, RemoteConnection,
};

/// Capacity of a session's command queue.
const COMMAND_QUEUE: usize = 256;

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, task not yet running
    Idle,
    /// TCP reachability check
    Probing,
    /// SSH handshake, authentication and shell allocation
    Authenticating,
    /// Shell open, nothing exchanged yet
    Ready,
    /// Shell open and data has flowed
    Streaming,
    /// A failure was reported; `Closed` follows
    Error,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Probing)
                | (Idle, Closed)
                | (Probing, Authenticating)
                | (Authenticating, Ready)
                | (Ready, Streaming)
                | (Streaming, Ready)
                | (Probing | Authenticating | Ready | Streaming, Error)
                | (Probing | Authenticating | Ready | Streaming | Error, Closed)
        )
    }

    /// Shell is open.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Error => "error",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Message to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Bytes for the shell's stdin
    Input(Vec<u8>),
    /// Window change
    Resize(PtySize),
}

/// What a session needs from the gateway.
#[derive(Clone)]
pub struct SessionContext {
    /// Opens SSH connections
    pub connector: Arc<dyn Connector>,
    /// Reachability check
    pub prober: Prober,
    /// Handshake bound
    pub auth_timeout: Duration,
    /// PTY for the shell
    pub pty: PtyRequest,
    /// Where events for the owning client go
    pub sink: EventSink,
}

/// A session that has not started yet.
pub struct Session {
    id: String,
    target: TargetDescriptor,
    ctx: SessionContext,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session. `cancel` is normally a child of the client's token.
    pub fn new(
        id: impl Into<String>,
        target: TargetDescriptor,
        ctx: SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            ctx,
            cancel,
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the session task.
    pub fn start(self) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let close_reason = Arc::new(OnceLock::new());
        let announced = Arc::new(AtomicBool::new(false));

        let session = SessionRef {
            id: self.id.clone(),
            target_name: self.target.name.clone(),
            started_at: Utc::now(),
            commands: cmd_tx,
            state: state_rx,
        };
        let cancel = self.cancel.clone();
        let sink = self.ctx.sink.clone();

        let task = SessionTask {
            id: self.id,
            target: self.target,
            ctx: self.ctx,
            cancel: self.cancel,
            close_reason: close_reason.clone(),
            announced: announced.clone(),
            state: StateCell(state_tx),
        };

        SessionHandle {
            session,
            cancel,
            close_reason,
            announced,
            sink,
            task: Some(tokio::spawn(task.run(cmd_rx))),
        }
    }
}

/// Cheap view of a running session used for routing.
#[derive(Debug, Clone)]
pub struct SessionRef {
    id: String,
    target_name: String,
    started_at: DateTime<Utc>,
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionRef {
    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name of the target
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// When the session was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Queue a command. Returns `false` if the session task has exited.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Wait until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Wait until the shell is open or the session ended. Returns the
    /// state that was reached.
    pub async fn settled(&self) -> SessionState {
        let mut state = self.state.clone();
        state
            .wait_for(|s| s.is_connected() || *s == SessionState::Closed)
            .await
            .map(|s| *s)
            .unwrap_or(SessionState::Closed)
    }
}

/// Owning handle to a running session; held by the registry.
pub struct SessionHandle {
    session: SessionRef,
    cancel: CancellationToken,
    close_reason: Arc<OnceLock<CloseReason>>,
    announced: Arc<AtomicBool>,
    sink: EventSink,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Routing view
    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    /// Session id
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Stop the session and wait for its teardown, at most `timeout`.
    ///
    /// The first reason given wins. Calling this again is a no-op.
    pub async fn shutdown(&mut self, reason: CloseReason, timeout: Duration) {
        let _ = self.close_reason.set(reason);
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id = %self.id(), error = %e, "Session task failed"),
            Err(_) => {
                warn!(
                    session_id = %self.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Session teardown timed out, aborting task"
                );
                task.abort();
                let reason = self.close_reason.get().copied().unwrap_or(reason);
                announce_closed(&self.announced, &self.sink, self.id(), reason);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn announce_closed(announced: &AtomicBool, sink: &EventSink, id: &str, reason: CloseReason) {
    if !announced.swap(true, Ordering::SeqCst) {
        sink.emit(ServerEvent::SessionClosed {
            session_id: id.to_string(),
            reason,
        });
    }
}

/// Publishes state changes, refusing illegal transitions.
struct StateCell(watch::Sender<SessionState>);

impl StateCell {
    fn set(&self, next: SessionState) {
        self.0.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                debug!(from = %current, to = %next, "Ignoring illegal session transition");
                return false;
            }
            *current = next;
            true
        });
    }
}

type Established = (Box<dyn RemoteConnection>, Box<dyn RemoteChannel>);

enum Exit {
    Closed(CloseReason),
    Failed(Error),
}

struct SessionTask {
    id: String,
    target: TargetDescriptor,
    ctx: SessionContext,
    cancel: CancellationToken,
    close_reason: Arc<OnceLock<CloseReason>>,
    announced: Arc<AtomicBool>,
    state: StateCell,
}

impl SessionTask {
    async fn run(self, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
        info!(session_id = %self.id, target = %self.target, "Starting session");

        let established = {
            let connect = self.establish();
            tokio::pin!(connect);
            let mut commands_open = true;
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break None,
                    result = &mut connect => break Some(result),
                    cmd = cmd_rx.recv(), if commands_open => match cmd {
                        // The shell does not exist yet
                        Some(SessionCommand::Input(bytes)) => {
                            debug!(session_id = %self.id, len = bytes.len(), "Discarding input before shell is ready");
                        }
                        Some(SessionCommand::Resize(_)) => {}
                        None => commands_open = false,
                    },
                }
            }
        };

        let exit = match established {
            None => Exit::Closed(self.requested_reason()),
            Some(Err(e)) => Exit::Failed(e),
            Some(Ok((conn, mut channel))) => {
                let exit = self.pump(channel.as_mut(), &mut cmd_rx).await;
                if let Err(e) = channel.close().await {
                    debug!(session_id = %self.id, error = %e, "Channel already closed");
                }
                conn.disconnect().await;
                exit
            }
        };

        let reason = match exit {
            Exit::Closed(reason) => reason,
            Exit::Failed(e) => {
                warn!(session_id = %self.id, error = %e, code = e.code(), "Session failed");
                self.state.set(SessionState::Error);
                self.ctx
                    .sink
                    .status(ConnectionStatus::Error, format_error_for_status(&e));
                CloseReason::Error
            }
        };

        self.state.set(SessionState::Closed);
        announce_closed(&self.announced, &self.ctx.sink, &self.id, reason);
        info!(session_id = %self.id, reason = reason.as_str(), "Session closed");
    }

    fn requested_reason(&self) -> CloseReason {
        self.close_reason
            .get()
            .copied()
            .unwrap_or(CloseReason::ClientDisconnected)
    }

    async fn establish(&self) -> Result<Established> {
        let target = &self.target;
        self.state.set(SessionState::Probing);
        self.ctx.sink.status(
            ConnectionStatus::Testing,
            format!("Testing connection to {}...", target.address()),
        );

        self.ctx
            .prober
            .probe(&target.host, target.port)
            .await
            .into_result(&target.host, target.port)?;

        self.state.set(SessionState::Authenticating);
        debug!(session_id = %self.id, method = target.credential.method(), "Authenticating");
        let conn = connect_with_timeout(self.ctx.connector.as_ref(), target, self.ctx.auth_timeout)
            .await?;

        let channel = match conn.open_shell(&self.ctx.pty).await {
            Ok(channel) => channel,
            Err(e) => {
                conn.disconnect().await;
                return Err(e);
            }
        };

        self.ctx.sink.status(
            ConnectionStatus::Connected,
            format!("Connected to {}", target.name),
        );
        self.state.set(SessionState::Ready);
        info!(session_id = %self.id, host = %target.host, port = target.port, "Shell ready");
        Ok((conn, channel))
    }

    async fn pump(
        &self,
        channel: &mut dyn RemoteChannel,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
    ) -> Exit {
        let mut decoder = Utf8Decoder::default();

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Closed(self.requested_reason()),
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Input(bytes)) => {
                        if let Err(e) = channel.write(&bytes).await {
                            break Exit::Failed(e);
                        }
                        self.state.set(SessionState::Streaming);
                    }
                    Some(SessionCommand::Resize(size)) => {
                        if let Err(e) = channel.resize(size).await {
                            warn!(session_id = %self.id, error = %e, "Window change failed");
                        }
                    }
                    // Every handle is gone
                    None => break Exit::Closed(self.requested_reason()),
                },
                event = channel.next_event() => match event {
                    Ok(Some(ChannelEvent::Stdout(data) | ChannelEvent::Stderr(data))) => {
                        self.state.set(SessionState::Streaming);
                        self.forward(decoder.decode(&data));
                    }
                    Ok(Some(ChannelEvent::ExitStatus(code))) => {
                        debug!(session_id = %self.id, code, "Remote shell exited");
                    }
                    Ok(Some(ChannelEvent::ExitSignal(signal))) => {
                        debug!(session_id = %self.id, signal = %signal, "Remote shell killed");
                    }
                    Ok(Some(ChannelEvent::Eof)) => {}
                    Ok(None) => break Exit::Closed(CloseReason::RemoteClosed),
                    Err(e) => break Exit::Failed(e),
                },
            }
        };

        self.forward(decoder.finish());
        exit
    }

    fn forward(&self, data: String) {
        if data.is_empty() {
            return;
        }
        self.ctx.sink.emit(ServerEvent::Output {
            data,
            stream: None,
            job_id: None,
        });
    }
}

/// Connect and authenticate within `timeout`.
///
/// Running out of time is reported as a handshake timeout against the
/// target, not as an authentication failure.
pub async fn connect_with_timeout(
    connector: &dyn Connector,
    target: &TargetDescriptor,
    timeout: Duration,
) -> Result<Box<dyn RemoteConnection>> {
    match tokio::time::timeout(timeout, connector.connect(target)).await {
        Ok(result) => result,
        Err(_) => Err(Error::NetworkUnreachable {
            host: target.host.clone(),
            port: target.port,
            cause: NetworkCause::HandshakeTimeout,
        }),
    }
}

#[cfg(test)]
mod tests;
