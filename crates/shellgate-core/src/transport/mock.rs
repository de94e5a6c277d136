//! In-memory transport for tests
//!
//! `MockConnector` hands out connections whose shells echo their input and
//! whose exec channels record their stdin and replay a scripted sequence of
//! events. Every open and
//! close is counted in [`MockState`] so tests can assert that handles were
//! released.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChannelEvent, Connector, PtyRequest, PtySize, RemoteChannel, RemoteConnection};
use crate::error::{Error, Result};
use crate::target::TargetDescriptor;

/// Counters and captured data shared by every handle a mock connector makes.
#[derive(Debug, Default)]
pub struct MockState {
    /// Connections ever opened
    pub connections_opened: AtomicUsize,
    /// Connections not yet disconnected
    pub connections_live: AtomicUsize,
    /// Shells ever opened
    pub shells_opened: AtomicUsize,
    /// Shells not yet closed
    pub shells_live: AtomicUsize,
    /// Highest number of simultaneously open shells
    pub max_shells_live: AtomicUsize,
    /// Exec channels not yet closed
    pub execs_live: AtomicUsize,
    written: Mutex<Vec<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    commands: Mutex<Vec<String>>,
    exec_inputs: Mutex<Vec<Vec<u8>>>,
    resizes: Mutex<Vec<PtySize>>,
    remotes: Mutex<Vec<MockShellRemote>>,
}

impl MockState {
    /// All bytes written to any shell, in order.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }

    /// Individual write calls, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    /// Commands passed to `exec`.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Stdin each exec channel received before its EOF.
    pub fn exec_inputs(&self) -> Vec<Vec<u8>> {
        lock(&self.exec_inputs).clone()
    }

    /// Sizes passed to `resize`.
    pub fn resizes(&self) -> Vec<PtySize> {
        lock(&self.resizes).clone()
    }

    /// Control handle for the n-th shell opened.
    pub fn shell(&self, index: usize) -> Option<MockShellRemote> {
        lock(&self.remotes).get(index).cloned()
    }

    fn load(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        Self::load(&self.connections_live)
    }

    /// Shells currently open.
    pub fn live_shells(&self) -> usize {
        Self::load(&self.shells_live)
    }

    /// Exec channels currently open.
    pub fn live_execs(&self) -> usize {
        Self::load(&self.execs_live)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
enum MockMsg {
    Event(ChannelEvent),
    Fail(String),
    Close,
}

/// Lets a test act as the remote end of a mock shell.
#[derive(Debug, Clone)]
pub struct MockShellRemote {
    tx: mpsc::UnboundedSender<MockMsg>,
}

impl MockShellRemote {
    /// Emit stdout bytes from the remote shell.
    pub fn send_output(&self, data: impl Into<Vec<u8>>) {
        let _ = self.tx.send(MockMsg::Event(ChannelEvent::Stdout(data.into())));
    }

    /// Simulate an explicit transport error.
    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(MockMsg::Fail(message.to_string()));
    }

    /// Simulate the remote shell exiting.
    pub fn close(&self) {
        let _ = self.tx.send(MockMsg::Event(ChannelEvent::Eof));
        let _ = self.tx.send(MockMsg::Close);
    }
}

/// What the mock does when asked to connect.
#[derive(Debug, Clone)]
enum ConnectBehavior {
    Accept,
    RejectAuth,
    RefuseShell,
    RefuseExec,
}

/// Connector producing in-memory connections.
pub struct MockConnector {
    state: Arc<MockState>,
    behavior: ConnectBehavior,
    echo: bool,
    connect_delay: Option<Duration>,
    exec_script: Vec<ChannelEvent>,
    hold_exec_open: bool,
}

impl MockConnector {
    /// A connector that accepts every target and echoes shell input.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            behavior: ConnectBehavior::Accept,
            echo: true,
            connect_delay: None,
            exec_script: vec![ChannelEvent::ExitStatus(0), ChannelEvent::Eof],
            hold_exec_open: false,
        }
    }

    /// Reject credentials for every target.
    #[must_use]
    pub fn rejecting_auth(mut self) -> Self {
        self.behavior = ConnectBehavior::RejectAuth;
        self
    }

    /// Authenticate but fail to allocate a shell.
    #[must_use]
    pub fn refusing_shell(mut self) -> Self {
        self.behavior = ConnectBehavior::RefuseShell;
        self
    }

    /// Authenticate but refuse exec requests.
    #[must_use]
    pub fn refusing_exec(mut self) -> Self {
        self.behavior = ConnectBehavior::RefuseExec;
        self
    }

    /// Do not echo shell input back as output.
    #[must_use]
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Sleep before completing `connect`.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Events every exec channel replays before closing.
    #[must_use]
    pub fn with_exec_script(mut self, events: Vec<ChannelEvent>) -> Self {
        self.exec_script = events;
        self
    }

    /// Keep exec channels open after the script until they are closed.
    #[must_use]
    pub fn holding_exec_open(mut self) -> Self {
        self.hold_exec_open = true;
        self
    }

    /// Shared counters.
    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &TargetDescriptor) -> Result<Box<dyn RemoteConnection>> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if matches!(self.behavior, ConnectBehavior::RejectAuth) {
            return Err(Error::AuthenticationFailed {
                username: target.username.clone(),
                detail: "all authentication methods failed".to_string(),
            });
        }

        self.state.connections_opened.fetch_add(1, Ordering::SeqCst);
        self.state.connections_live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            behavior: self.behavior.clone(),
            echo: self.echo,
            exec_script: self.exec_script.clone(),
            hold_exec_open: self.hold_exec_open,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    behavior: ConnectBehavior,
    echo: bool,
    exec_script: Vec<ChannelEvent>,
    hold_exec_open: bool,
    closed: AtomicBool,
}

impl MockConnection {
    fn release(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.connections_live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn open_shell(&self, _pty: &PtyRequest) -> Result<Box<dyn RemoteChannel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Protocol("connection closed".to_string()));
        }
        if matches!(self.behavior, ConnectBehavior::RefuseShell) {
            return Err(Error::Protocol("shell request refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state.remotes).push(MockShellRemote { tx: tx.clone() });

        self.state.shells_opened.fetch_add(1, Ordering::SeqCst);
        let live = self.state.shells_live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_shells_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(MockChannel {
            state: self.state.clone(),
            kind: ChannelKind::Shell,
            rx,
            echo: self.echo.then_some(tx),
            stdin: Vec::new(),
            closed: false,
        }))
    }

    async fn exec(&self, command: &str) -> Result<Box<dyn RemoteChannel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Protocol("connection closed".to_string()));
        }
        if matches!(self.behavior, ConnectBehavior::RefuseExec) {
            return Err(Error::Protocol("exec request refused".to_string()));
        }
        lock(&self.state.commands).push(command.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        for event in &self.exec_script {
            let _ = tx.send(MockMsg::Event(event.clone()));
        }
        let keep_open = if self.hold_exec_open {
            Some(tx)
        } else {
            let _ = tx.send(MockMsg::Close);
            None
        };

        self.state.execs_live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChannel {
            state: self.state.clone(),
            kind: ChannelKind::Exec,
            rx,
            echo: keep_open,
            stdin: Vec::new(),
            closed: false,
        }))
    }

    async fn disconnect(&self) {
        self.release();
    }
}

#[derive(Clone, Copy)]
enum ChannelKind {
    Shell,
    Exec,
}

struct MockChannel {
    state: Arc<MockState>,
    kind: ChannelKind,
    rx: mpsc::UnboundedReceiver<MockMsg>,
    // For shells this echoes input; for held exec channels it only keeps
    // the queue open.
    echo: Option<mpsc::UnboundedSender<MockMsg>>,
    stdin: Vec<u8>,
    closed: bool,
}

impl MockChannel {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.echo = None;
        let counter = match self.kind {
            ChannelKind::Shell => &self.state.shells_live,
            ChannelKind::Exec => &self.state.execs_live,
        };
        counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl RemoteChannel for MockChannel {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Protocol("channel closed".to_string()));
        }
        if let ChannelKind::Exec = self.kind {
            self.stdin.extend_from_slice(data);
            return Ok(());
        }
        lock(&self.state.written).extend_from_slice(data);
        lock(&self.state.writes).push(data.to_vec());
        if let Some(echo) = &self.echo {
            let _ = echo.send(MockMsg::Event(ChannelEvent::Stdout(data.to_vec())));
        }
        Ok(())
    }

    async fn eof(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Protocol("channel closed".to_string()));
        }
        if let ChannelKind::Exec = self.kind {
            lock(&self.state.exec_inputs).push(std::mem::take(&mut self.stdin));
        }
        Ok(())
    }

    async fn resize(&mut self, size: PtySize) -> Result<()> {
        lock(&self.state.resizes).push(size);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(MockMsg::Event(event)) => Ok(Some(event)),
            Some(MockMsg::Fail(message)) => Err(Error::Protocol(message)),
            Some(MockMsg::Close) | None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}
