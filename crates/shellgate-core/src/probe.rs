//! Connectivity prober
//!
//! A bare TCP reachability check run before the SSH handshake, so that
//! "host unreachable" is reported differently from "host reachable but the
//! credentials were rejected". The prober never authenticates.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

use crate::error::{Error, NetworkCause, Result};

/// Default probe bound.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A TCP connection was established (and immediately dropped)
    Reachable,
    /// The host could not be reached
    Unreachable(NetworkCause),
}

impl ProbeOutcome {
    /// Convert into a `Result`, attaching the target for error reporting.
    pub fn into_result(self, host: &str, port: u16) -> Result<()> {
        match self {
            ProbeOutcome::Reachable => Ok(()),
            ProbeOutcome::Unreachable(cause) => Err(Error::NetworkUnreachable {
                host: host.to_string(),
                port,
                cause,
            }),
        }
    }
}

/// TCP prober with a fixed timeout.
#[derive(Debug, Clone, Copy)]
pub struct Prober {
    timeout: Duration,
}

impl Prober {
    /// Create a prober with the given bound.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `host:port`.
    pub async fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        probe(host, port, self.timeout).await
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

/// Resolve `host` and try each address until one accepts a TCP connection.
///
/// The whole operation, DNS included, is bounded by `timeout`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    let attempt = async {
        let addrs: Vec<SocketAddr> = match lookup_host((host, port)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!(host = %host, error = %e, "DNS resolution failed");
                return Err(NetworkCause::DnsResolution);
            }
        };
        if addrs.is_empty() {
            return Err(NetworkCause::DnsResolution);
        }

        let mut last = NetworkCause::Unreachable("no address accepted the connection".into());
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    drop(stream);
                    return Ok(addr);
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "TCP connect failed");
                    last = classify_io_error(&e);
                }
            }
        }
        Err(last)
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(addr)) => {
            debug!(host = %host, port, addr = %addr, "Network connectivity check passed");
            ProbeOutcome::Reachable
        }
        Ok(Err(cause)) => ProbeOutcome::Unreachable(cause),
        Err(_) => {
            debug!(host = %host, port, timeout_ms = timeout.as_millis() as u64, "Network timeout");
            ProbeOutcome::Unreachable(NetworkCause::Timeout)
        }
    }
}

/// Map a transport error onto the network failure taxonomy.
pub fn classify_io_error(err: &io::Error) -> NetworkCause {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => NetworkCause::ConnectionRefused,
        io::ErrorKind::TimedOut => NetworkCause::Timeout,
        _ => NetworkCause::Unreachable(err.to_string()),
    }
}
