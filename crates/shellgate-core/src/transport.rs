//! Remote transport seam
//!
//! The session manager and the script executor only talk to these traits.
//! `shellgate-ssh` implements them over SSH; [`mock`] implements them in
//! memory for tests.

pub mod mock;

use async_trait::async_trait;

use crate::error::Result;
use crate::target::TargetDescriptor;

/// Something the remote side of a channel produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Standard output bytes
    Stdout(Vec<u8>),
    /// Standard error bytes (SSH extended data)
    Stderr(Vec<u8>),
    /// Exit code of the remote process
    ExitStatus(u32),
    /// The remote process was killed by a signal
    ExitSignal(String),
    /// The remote side will send no more data
    Eof,
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Columns
    pub cols: u32,
    /// Rows
    pub rows: u32,
}

/// Parameters for an interactive shell's pseudo-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// `TERM` value
    pub term: String,
    /// Initial size
    pub size: PtySize,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            size: PtySize { cols: 80, rows: 24 },
        }
    }
}

/// One open channel: an interactive shell or a single exec request.
#[async_trait]
pub trait RemoteChannel: Send {
    /// Write bytes to the channel's stdin, verbatim.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Signal end of stdin. The remote may keep producing output.
    async fn eof(&mut self) -> Result<()>;

    /// Change the pseudo-terminal size. Exec channels may ignore this.
    async fn resize(&mut self, size: PtySize) -> Result<()>;

    /// Wait for the next event.
    ///
    /// `Ok(None)` means the channel closed normally; `Err` means the
    /// transport reported an explicit failure.
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>>;

    /// Close the channel. Closing an already-closed channel is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// An authenticated connection to a target.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Request a pseudo-terminal and an interactive shell.
    async fn open_shell(&self, pty: &PtyRequest) -> Result<Box<dyn RemoteChannel>>;

    /// Run one command.
    async fn exec(&self, command: &str) -> Result<Box<dyn RemoteChannel>>;

    /// Tear the connection down. Safe to call more than once.
    async fn disconnect(&self);
}

/// Opens authenticated connections.
///
/// Implementations classify failures as [`crate::Error::NetworkUnreachable`]
/// or [`crate::Error::AuthenticationFailed`]; callers apply the handshake
/// timeout.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate.
    async fn connect(&self, target: &TargetDescriptor) -> Result<Box<dyn RemoteConnection>>;
}
