//! Server module for Shellgate
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for the server binary
//! - `loader`: Configuration loading from files and environment
//! - `init`: Router construction and the run loop

pub mod config;
mod init;
mod loader;

#[cfg(test)]
pub(crate) use init::build_router;
pub use init::run;
pub use loader::load_config;
