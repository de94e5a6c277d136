//! Gateway configuration
//!
//! Deserialized from the `[gateway]` section of the server config. Every
//! field has a default so an empty section is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::target::TargetDescriptor;
use crate::transport::{PtyRequest, PtySize};

/// Default TCP probe bound in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
/// Default SSH handshake bound in seconds
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;
/// Default per-session teardown bound in seconds
pub const DEFAULT_TEARDOWN_TIMEOUT_SECS: u64 = 3;
/// Default execution payload limit (64 KiB)
pub const DEFAULT_MAX_CODE_BYTES: usize = 64 * 1024;

/// `[gateway]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// TCP probe bound
    pub probe_timeout_secs: u64,
    /// SSH connect + authenticate bound
    pub auth_timeout_secs: u64,
    /// How long teardown waits for a session task before aborting it
    pub teardown_timeout_secs: u64,
    /// Test the default target as soon as a client attaches
    pub probe_on_connect: bool,
    /// Shell pseudo-terminal
    pub pty: PtyConfig,
    /// Script execution
    pub execution: ExecutionConfig,
    /// Target used by `test-connection` when none is given
    pub default_target: Option<TargetDescriptor>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            teardown_timeout_secs: DEFAULT_TEARDOWN_TIMEOUT_SECS,
            probe_on_connect: true,
            pty: PtyConfig::default(),
            execution: ExecutionConfig::default(),
            default_target: None,
        }
    }
}

impl GatewayConfig {
    /// Probe bound as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Handshake bound as a `Duration`.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Teardown bound as a `Duration`.
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("auth_timeout_secs", self.auth_timeout_secs),
            ("teardown_timeout_secs", self.teardown_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("gateway.{} must be > 0", name)));
            }
        }
        self.pty.validate()?;
        self.execution.validate()
    }
}

/// `[gateway.pty]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// `TERM` sent with the PTY request
    pub term: String,
    /// Initial columns
    pub cols: u32,
    /// Initial rows
    pub rows: u32,
}

impl Default for PtyConfig {
    fn default() -> Self {
        let pty = PtyRequest::default();
        Self {
            term: pty.term,
            cols: pty.size.cols,
            rows: pty.size.rows,
        }
    }
}

impl PtyConfig {
    /// PTY request for a new shell.
    pub fn to_request(&self) -> PtyRequest {
        PtyRequest {
            term: self.term.clone(),
            size: PtySize {
                cols: self.cols,
                rows: self.rows,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.term.trim().is_empty() {
            return Err(Error::Config("gateway.pty.term must not be empty".into()));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(Error::Config(
                "gateway.pty.cols and gateway.pty.rows must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// `[gateway.execution]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Directory on the target for temp scripts
    pub remote_temp_dir: String,
    /// Allow `run-command` with `remote: false`
    pub local_enabled: bool,
    /// Directory on the gateway host for temp scripts; OS temp dir if unset
    pub local_temp_dir: Option<PathBuf>,
    /// Largest accepted payload
    pub max_code_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            remote_temp_dir: "/tmp".to_string(),
            local_enabled: false,
            local_temp_dir: None,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
        }
    }
}

impl ExecutionConfig {
    /// Resolved local temp directory.
    pub fn local_dir(&self) -> PathBuf {
        self.local_temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    fn validate(&self) -> Result<()> {
        if !self.remote_temp_dir.starts_with('/') {
            return Err(Error::Config(
                "gateway.execution.remote_temp_dir must be an absolute path".into(),
            ));
        }
        if self.max_code_bytes == 0 {
            return Err(Error::Config(
                "gateway.execution.max_code_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
