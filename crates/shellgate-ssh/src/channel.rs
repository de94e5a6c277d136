use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use tracing::trace;

use shellgate_core::transport::{ChannelEvent, PtySize, RemoteChannel};
use shellgate_core::{Error, Result};

/// A russh session channel seen through the core transport trait.
pub(crate) struct SshChannel {
    inner: Channel<Msg>,
    closed: bool,
}

impl SshChannel {
    pub(crate) fn new(inner: Channel<Msg>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner
            .data(data)
            .await
            .map_err(|e| Error::Protocol(format!("write failed: {}", e)))
    }

    async fn eof(&mut self) -> Result<()> {
        self.inner
            .eof()
            .await
            .map_err(|e| Error::Protocol(format!("eof failed: {}", e)))
    }

    async fn resize(&mut self, size: PtySize) -> Result<()> {
        self.inner
            .window_change(size.cols, size.rows, 0, 0)
            .await
            .map_err(|e| Error::Protocol(format!("window change failed: {}", e)))
    }

    async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let Some(msg) = self.inner.wait().await else {
                self.closed = true;
                return Ok(None);
            };
            let event = match msg {
                ChannelMsg::Data { data } => ChannelEvent::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { data, .. } => ChannelEvent::Stderr(data.to_vec()),
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    ChannelEvent::ExitSignal(signal_name_of(&signal_name))
                }
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => {
                    self.closed = true;
                    return Ok(None);
                }
                other => {
                    trace!(msg = ?other, "Ignoring channel message");
                    continue;
                }
            };
            return Ok(Some(event));
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The peer may already be gone
        let _ = self.inner.eof().await;
        let _ = self.inner.close().await;
        Ok(())
    }
}

/// Signal name without the `SIG` prefix, as the remote reported it.
pub(crate) fn signal_name_of(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        named => format!("{:?}", named),
    }
}
