//! Remote Script Executor
//!
//! A `run-command` becomes an execution job: one task that materializes the
//! code as a temp file, runs the interpreter, streams stdout and stderr back
//! tagged with the job id, reports the exit status and removes the file.
//! Jobs are independent of the interactive shell and of each other.

pub mod language;
mod local;
mod remote;
pub mod script;

#[cfg(test)]
mod tests;

pub use language::Language;
pub use script::{build_remote_command, build_script, shell_quote, temp_file_name};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::error::{format_error_for_status, Error, Result};
use crate::events::{EventSink, ExecutionRequest, OutputStream, ServerEvent};
use crate::target::TargetDescriptor;
use crate::transport::Connector;

/// Starts execution jobs.
#[derive(Clone)]
pub struct Executor {
    connector: Arc<dyn Connector>,
    config: ExecutionConfig,
    auth_timeout: Duration,
}

impl Executor {
    /// Create an executor.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ExecutionConfig,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            config,
            auth_timeout,
        }
    }

    /// Execution settings
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Spawn a job on `tracker` and return its id.
    ///
    /// `target` is the client's current session target; it is only needed
    /// for remote jobs. Every outcome is reported through `sink`.
    pub fn spawn(
        &self,
        request: ExecutionRequest,
        target: Option<TargetDescriptor>,
        sink: EventSink,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> String {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            language: Language::from_tag(request.language.as_deref()),
            code: request.code,
            sink,
            cancel,
        };
        let job_id = job.id.clone();
        let executor = self.clone();
        let remote = request.remote;

        tracker.spawn(async move {
            if let Err(e) = executor.run(&job, remote, target.as_ref()).await {
                warn!(job_id = %job.id, error = %e, "Execution failed to start");
                job.error(&e);
            }
        });
        job_id
    }

    async fn run(&self, job: &Job, remote: bool, target: Option<&TargetDescriptor>) -> Result<()> {
        if job.code.len() > self.config.max_code_bytes {
            return Err(Error::ExecutionStart(format!(
                "payload of {} bytes exceeds the {} byte limit",
                job.code.len(),
                self.config.max_code_bytes
            )));
        }

        if remote {
            let target = target.ok_or(Error::NoTarget)?;
            info!(job_id = %job.id, language = %job.language, target = %target, "Remote execution requested");
            remote::run(
                job,
                self.connector.as_ref(),
                target,
                &self.config.remote_temp_dir,
                self.auth_timeout,
            )
            .await
        } else {
            if !self.config.local_enabled {
                return Err(Error::ExecutionStart(
                    "local execution is disabled on this gateway".to_string(),
                ));
            }
            info!(job_id = %job.id, language = %job.language, "Local execution requested");
            local::run(job, &self.config.local_dir()).await
        }
    }
}

/// One execution job and its reporting channel.
pub(crate) struct Job {
    id: String,
    language: Language,
    code: String,
    sink: EventSink,
    cancel: CancellationToken,
}

impl Job {
    fn started(&self, remote: bool) {
        self.sink.emit(ServerEvent::ExecutionStarted {
            job_id: self.id.clone(),
            language: self.language.name().to_string(),
            remote,
        });
    }

    fn output(&self, stream: OutputStream, data: String) {
        if data.is_empty() {
            return;
        }
        self.sink.emit(ServerEvent::Output {
            data,
            stream: Some(stream),
            job_id: Some(self.id.clone()),
        });
    }

    fn exit(&self, code: Option<i32>, signal: Option<String>) {
        info!(job_id = %self.id, code = ?code, signal = ?signal, "Execution finished");
        self.sink.emit(ServerEvent::ExecutionExit {
            job_id: self.id.clone(),
            code,
            signal,
        });
    }

    fn error(&self, error: &Error) {
        self.sink.emit(ServerEvent::ExecutionError {
            job_id: self.id.clone(),
            message: format_error_for_status(error),
        });
    }
}
