use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::{self, HashAlg, PrivateKeyWithHashAlg};
use russh::Disconnect;
use secrecy::ExposeSecret;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use shellgate_core::probe::classify_io_error;
use shellgate_core::transport::{Connector, PtyRequest, RemoteChannel, RemoteConnection};
use shellgate_core::{Credential, Error, NetworkCause, Result, TargetDescriptor};

use crate::channel::SshChannel;

/// Client-side SSH settings.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Interval between keepalive requests on idle connections
    pub keepalive_interval: Option<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// Opens authenticated SSH connections.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    /// Create a connector.
    pub fn new(options: SshOptions) -> Self {
        let config = client::Config {
            // Shells may idle indefinitely
            inactivity_timeout: None,
            keepalive_interval: options.keepalive_interval,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(SshOptions::default())
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &TargetDescriptor) -> Result<Box<dyn RemoteConnection>> {
        let stream = dial(&target.host, target.port).await?;
        let _ = stream.set_nodelay(true);

        let handler = ClientHandler {
            host: target.address(),
        };
        let mut handle = client::connect_stream(self.config.clone(), stream, handler)
            .await
            .map_err(|e| classify_ssh_error(e, target))?;

        let result = authenticate(&mut handle, target).await;
        match result {
            Ok(AuthResult::Success) => {
                info!(target = %target, method = target.credential.method(), "SSH authenticated");
                Ok(Box::new(SshConnection { handle }))
            }
            Ok(AuthResult::Failure { partial_success, .. }) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                Err(Error::AuthenticationFailed {
                    username: target.username.clone(),
                    detail: if partial_success {
                        format!("{} accepted but more methods required", target.credential.method())
                    } else {
                        format!("{} rejected by server", target.credential.method())
                    },
                })
            }
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                Err(e)
            }
        }
    }
}

/// Resolve and open the TCP stream, keeping the failure cause.
async fn dial(host: &str, port: u16) -> Result<TcpStream> {
    let unreachable = |cause| Error::NetworkUnreachable {
        host: host.to_string(),
        port,
        cause,
    };

    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|_| unreachable(NetworkCause::DnsResolution))?
        .collect();

    let mut last = NetworkCause::DnsResolution;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "SSH dial failed");
                last = classify_io_error(&e);
            }
        }
    }
    Err(unreachable(last))
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    target: &TargetDescriptor,
) -> Result<AuthResult> {
    let username = target.username.as_str();
    let result = match &target.credential {
        Credential::Password(password) => {
            handle
                .authenticate_password(username, password.expose_secret())
                .await
        }
        Credential::PrivateKey {
            key_pem,
            passphrase,
        } => {
            let key = keys::decode_secret_key(
                key_pem.expose_secret(),
                passphrase.as_ref().map(|p| p.expose_secret()),
            )
            .map_err(|e| Error::AuthenticationFailed {
                username: target.username.clone(),
                detail: format!("unusable private key: {}", e),
            })?;

            let hash = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            handle
                .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
                .await
        }
    };
    result.map_err(|e| classify_ssh_error(e, target))
}

/// Map a russh failure onto the core taxonomy.
pub(crate) fn classify_ssh_error(err: russh::Error, target: &TargetDescriptor) -> Error {
    match err {
        russh::Error::IO(e) => Error::NetworkUnreachable {
            host: target.host.clone(),
            port: target.port,
            cause: classify_io_error(&e),
        },
        russh::Error::ConnectionTimeout => Error::NetworkUnreachable {
            host: target.host.clone(),
            port: target.port,
            cause: NetworkCause::HandshakeTimeout,
        },
        other => Error::Protocol(other.to_string()),
    }
}

/// Accepts every host key and logs its fingerprint.
pub(crate) struct ClientHandler {
    host: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            algorithm = %server_public_key.algorithm(),
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "Accepting host key"
        );
        Ok(true)
    }
}

/// An authenticated SSH connection.
struct SshConnection {
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl RemoteConnection for SshConnection {
    async fn open_shell(&self, pty: &PtyRequest) -> Result<Box<dyn RemoteChannel>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Protocol(format!("channel open failed: {}", e)))?;
        channel
            .request_pty(
                false,
                &pty.term,
                pty.size.cols,
                pty.size.rows,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| Error::Protocol(format!("pty request failed: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| Error::Protocol(format!("shell request failed: {}", e)))?;
        Ok(Box::new(SshChannel::new(channel)))
    }

    async fn exec(&self, command: &str) -> Result<Box<dyn RemoteChannel>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Protocol(format!("channel open failed: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Protocol(format!("exec request failed: {}", e)))?;
        Ok(Box::new(SshChannel::new(channel)))
    }

    async fn disconnect(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}
