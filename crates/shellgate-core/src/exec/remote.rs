use std::time::Duration;

use tracing::debug;

use super::script::{build_remote_command, remote_path, temp_file_name};
use super::Job;
use crate::error::{Error, Result};
use crate::events::{OutputStream, Utf8Decoder};
use crate::session::connect_with_timeout;
use crate::target::TargetDescriptor;
use crate::transport::{ChannelEvent, Connector, RemoteChannel};

enum Outcome {
    Finished,
    Cancelled,
    Failed(Error),
}

/// Run `job` over a fresh connection to `target`.
///
/// `Err` means the command never started; once it has, every outcome is
/// reported on the job itself.
pub(super) async fn run(
    job: &Job,
    connector: &dyn Connector,
    target: &TargetDescriptor,
    temp_dir: &str,
    auth_timeout: Duration,
) -> Result<()> {
    let path = remote_path(temp_dir, &temp_file_name(job.language));
    let command = build_remote_command(job.language, &path);

    let conn = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => return Ok(()),
        result = connect_with_timeout(connector, target, auth_timeout) => result?,
    };

    let mut channel = match conn.exec(&command).await {
        Ok(channel) => channel,
        Err(e) => {
            conn.disconnect().await;
            return Err(Error::ExecutionStart(format!("exec request failed: {}", e)));
        }
    };

    let sent = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => None,
        result = send_code(channel.as_mut(), &job.code) => Some(result),
    };
    match sent {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            let _ = channel.close().await;
            conn.disconnect().await;
            return Err(Error::ExecutionStart(format!("sending code failed: {}", e)));
        }
        None => {
            let _ = channel.close().await;
            conn.disconnect().await;
            return Ok(());
        }
    }
    debug!(job_id = %job.id, path = %path, bytes = job.code.len(), "Remote command started");
    job.started(true);

    let mut stdout = Utf8Decoder::default();
    let mut stderr = Utf8Decoder::default();
    let mut code = None;
    let mut signal = None;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = job.cancel.cancelled() => break Outcome::Cancelled,
            event = channel.next_event() => match event {
                Ok(Some(ChannelEvent::Stdout(data))) => {
                    job.output(OutputStream::Stdout, stdout.decode(&data));
                }
                Ok(Some(ChannelEvent::Stderr(data))) => {
                    job.output(OutputStream::Stderr, stderr.decode(&data));
                }
                Ok(Some(ChannelEvent::ExitStatus(status))) => {
                    code = Some(i32::try_from(status).unwrap_or(i32::MAX));
                }
                Ok(Some(ChannelEvent::ExitSignal(name))) => signal = Some(name),
                Ok(Some(ChannelEvent::Eof)) => {}
                Ok(None) => break Outcome::Finished,
                Err(e) => break Outcome::Failed(e),
            },
        }
    };

    job.output(OutputStream::Stdout, stdout.finish());
    job.output(OutputStream::Stderr, stderr.finish());

    if let Err(e) = channel.close().await {
        debug!(job_id = %job.id, error = %e, "Exec channel already closed");
    }
    conn.disconnect().await;

    match outcome {
        Outcome::Finished => job.exit(code, signal),
        Outcome::Failed(e) => job.error(&e),
        Outcome::Cancelled => debug!(job_id = %job.id, "Remote execution cancelled"),
    }
    Ok(())
}

/// Stream the payload to the remote `cat` and close its stdin.
async fn send_code(channel: &mut dyn RemoteChannel, code: &str) -> Result<()> {
    channel.write(code.as_bytes()).await?;
    channel.eof().await
}
