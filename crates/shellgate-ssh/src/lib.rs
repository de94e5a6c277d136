//! Shellgate SSH - russh transport
//!
//! Implements the `shellgate-core` transport traits over SSH:
//! [`SshConnector`] dials and authenticates, the connection it returns opens
//! PTY shells and exec channels.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod connector;

pub use connector::{SshConnector, SshOptions};
