use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::script::temp_file_name;
use super::Job;
use crate::error::{Error, Result};
use crate::events::{OutputStream, Utf8Decoder};

const READ_CHUNK: usize = 8192;

/// Run `job` on the gateway host.
///
/// The interpreter is started directly with the temp file as its only
/// argument; no shell is involved.
pub(super) async fn run(job: &Job, dir: &Path) -> Result<()> {
    let path = dir.join(temp_file_name(job.language));
    write_script(&path, &job.code).await.map_err(|e| {
        Error::ExecutionStart(format!("cannot write {}: {}", path.display(), e))
    })?;

    let interpreter = job.language.interpreter();
    let spawned = Command::new(interpreter)
        .arg(&path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            remove(&path).await;
            return Err(Error::ExecutionStart(format!(
                "failed to start {}: {}",
                interpreter, e
            )));
        }
    };
    job.started(false);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => None,
        (status, _, _) = async {
            tokio::join!(
                child.wait(),
                pump(stdout, OutputStream::Stdout, job),
                pump(stderr, OutputStream::Stderr, job),
            )
        } => Some(status),
    };
    // kill_on_drop takes care of a cancelled child
    drop(child);
    remove(&path).await;

    match finished {
        Some(Ok(status)) => job.exit(status.code(), exit_signal(&status)),
        Some(Err(e)) => job.error(&Error::Io(e)),
        None => debug!(job_id = %job.id, "Local execution cancelled"),
    }
    Ok(())
}

async fn write_script(path: &Path, code: &str) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(code.as_bytes()).await?;
    file.flush().await
}

async fn remove(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Temp file cleanup failed");
    }
}

async fn pump<R>(reader: Option<R>, stream: OutputStream, job: &Job)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => job.output(stream, decoder.decode(&buf[..n])),
            Err(e) => {
                debug!(job_id = %job.id, error = %e, "Output pipe read failed");
                break;
            }
        }
    }
    job.output(stream, decoder.finish());
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(signal_name)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

/// SSH-style signal name (no `SIG` prefix).
pub(super) fn signal_name(signal: i32) -> String {
    match signal {
        1 => "HUP",
        2 => "INT",
        3 => "QUIT",
        6 => "ABRT",
        9 => "KILL",
        11 => "SEGV",
        13 => "PIPE",
        14 => "ALRM",
        15 => "TERM",
        _ => return signal.to_string(),
    }
    .to_string()
}
