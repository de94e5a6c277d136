//! Target descriptors
//!
//! A target is supplied by the client with every `start-session` and is
//! never persisted. Secrets live in [`SecretString`] so they stay out of
//! logs and `Debug` output.

use std::fmt;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Port used when the client does not send one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How the gateway authenticates against the remote account.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Password authentication
    Password(SecretString),
    /// Public key authentication with an OpenSSH/PEM encoded private key
    PrivateKey {
        /// Encoded private key
        key_pem: SecretString,
        /// Passphrase for encrypted keys
        passphrase: Option<SecretString>,
    },
}

impl Credential {
    /// Method name for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey { .. } => "publickey",
        }
    }
}

/// A remote machine plus the account used to log in.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawTarget")]
pub struct TargetDescriptor {
    /// Display name
    pub name: String,
    /// Host name or IP address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Remote account
    pub username: String,
    /// Login credential
    pub credential: Credential,
}

impl TargetDescriptor {
    /// Build a password target, validating host, port and username.
    pub fn with_password(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        RawTarget {
            name: Some(name.into()),
            host: host.into(),
            port: Some(PortValue::Number(u64::from(port))),
            username: username.into(),
            password: Some(password.into()),
            private_key: None,
            passphrase: None,
        }
        .try_into()
    }

    /// `host:port` form used for connecting and logging.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.username, self.address())
    }
}

/// Wire form of a target. The browser historically sends `ip` instead of
/// `host` and the port as a string.
#[derive(Deserialize)]
struct RawTarget {
    #[serde(default)]
    name: Option<String>,
    #[serde(alias = "ip")]
    host: String,
    #[serde(default)]
    port: Option<PortValue>,
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, alias = "privateKey")]
    private_key: Option<String>,
    #[serde(default)]
    passphrase: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

fn parse_port(value: Option<PortValue>) -> Result<u16> {
    let raw = match value {
        None => return Ok(DEFAULT_SSH_PORT),
        Some(PortValue::Number(n)) => n,
        Some(PortValue::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(DEFAULT_SSH_PORT);
            }
            s.parse::<u64>()
                .map_err(|_| Error::InvalidTarget(format!("port '{}' is not a number", s)))?
        }
    };
    match u16::try_from(raw) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::InvalidTarget(format!(
            "port {} is outside 1-65535",
            raw
        ))),
    }
}

impl TryFrom<RawTarget> for TargetDescriptor {
    type Error = Error;

    fn try_from(raw: RawTarget) -> Result<Self> {
        let host = raw.host.trim().to_string();
        if host.is_empty() {
            return Err(Error::InvalidTarget("host is required".to_string()));
        }
        let username = raw.username.trim().to_string();
        if username.is_empty() {
            return Err(Error::InvalidTarget("username is required".to_string()));
        }
        let port = parse_port(raw.port)?;

        let credential = match (raw.private_key, raw.password) {
            (Some(key), _) if !key.trim().is_empty() => Credential::PrivateKey {
                key_pem: SecretString::from(key),
                passphrase: raw
                    .passphrase
                    .filter(|p| !p.is_empty())
                    .map(SecretString::from),
            },
            (_, Some(password)) => Credential::Password(SecretString::from(password)),
            _ => {
                return Err(Error::InvalidTarget(
                    "a password or private key is required".to_string(),
                ))
            }
        };

        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| host.clone());

        Ok(Self {
            name,
            host,
            port,
            username,
            credential,
        })
    }
}

#[cfg(test)]
mod tests;
