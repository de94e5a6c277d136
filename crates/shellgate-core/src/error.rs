//! Error types for shellgate-core
//!
//! Every failure here is scoped to one session attempt or one execution job.
//! None of them is fatal to the gateway process.

use std::fmt;
use thiserror::Error;

/// Why a host could not be reached at the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCause {
    /// The host name did not resolve
    DnsResolution,
    /// The host answered with a TCP reset
    ConnectionRefused,
    /// No answer within the probe bound
    Timeout,
    /// TCP connected but the SSH handshake did not finish in time
    HandshakeTimeout,
    /// Route/host unreachable or another transport failure
    Unreachable(String),
}

impl fmt::Display for NetworkCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution => write!(f, "host not found"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::Unreachable(detail) => write!(f, "unreachable: {}", detail),
        }
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// DNS failure, refused connection or timeout
    #[error("network unreachable: {host}:{port} ({cause})")]
    NetworkUnreachable {
        /// Target host
        host: String,
        /// Target port
        port: u16,
        /// Classified cause
        cause: NetworkCause,
    },

    /// The remote host rejected the credentials
    #[error("authentication failed for {username}: {detail}")]
    AuthenticationFailed {
        /// Remote account
        username: String,
        /// What the server reported
        detail: String,
    },

    /// Channel-level failure after a successful handshake
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote or local command could not be launched
    #[error("execution start error: {0}")]
    ExecutionStart(String),

    /// A remote operation was requested before any target was supplied
    #[error("no target configured")]
    NoTarget,

    /// The target descriptor is malformed
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The client sent something the gateway cannot act on
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A configuration value is out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NetworkUnreachable { .. } => "NETWORK_UNREACHABLE",
            Error::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::ExecutionStart(_) | Error::NoTarget => "EXECUTION_START_ERROR",
            Error::InvalidTarget(_) => "INVALID_TARGET",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

/// Trait for user-friendly error messages
///
/// The gateway reports failures to a browser, so every variant carries a
/// cause-specific message and, where it helps, a hint at the fix.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::NetworkUnreachable { host, port, cause } => match cause {
                NetworkCause::DnsResolution => {
                    format!("Network connectivity failed: host {} not found", host)
                }
                NetworkCause::ConnectionRefused => format!(
                    "Network connectivity failed: connection to {}:{} refused",
                    host, port
                ),
                NetworkCause::Timeout => format!(
                    "Network connectivity failed: connection to {}:{} timed out",
                    host, port
                ),
                NetworkCause::HandshakeTimeout => format!(
                    "SSH connection failed: handshake with {}:{} timed out",
                    host, port
                ),
                NetworkCause::Unreachable(detail) => format!(
                    "Network connectivity failed: {}:{} unreachable ({})",
                    host, port, detail
                ),
            },
            Error::AuthenticationFailed { username, detail } => format!(
                "SSH connection failed: authentication rejected for user {} ({})",
                username, detail
            ),
            Error::Protocol(msg) => format!("SSH channel error: {}", msg),
            Error::ExecutionStart(msg) => format!("Execution error: {}", msg),
            Error::NoTarget => "Execution error: no target configured".to_string(),
            Error::InvalidTarget(msg) => format!("Invalid target: {}", msg),
            Error::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            Error::Config(msg) => format!("Configuration error: {}", msg),
            Error::Io(e) => format!("I/O error: {}", e),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::NetworkUnreachable { cause, .. } => Some(
                match cause {
                    NetworkCause::DnsResolution => "Host not found - check the IP address",
                    NetworkCause::ConnectionRefused => {
                        "Connection refused - check if the SSH service is running"
                    }
                    NetworkCause::Timeout | NetworkCause::Unreachable(_) => {
                        "Check if the VM is running and accessible"
                    }
                    NetworkCause::HandshakeTimeout => {
                        "The port answered but did not speak SSH in time"
                    }
                }
                .to_string(),
            ),
            Error::AuthenticationFailed { .. } => {
                Some("Authentication failed - check username/password".to_string())
            }
            Error::NoTarget => Some("Start a session before running remote code".to_string()),
            _ => None,
        }
    }
}

/// Format an error as a single status line: message plus hint.
pub fn format_error_for_status(error: &Error) -> String {
    match error.suggestion() {
        Some(hint) => format!("{}. {}.", error.user_message(), hint),
        None => error.user_message(),
    }
}
