//! Per-client dispatch
//!
//! [`Gateway`] holds everything shared across clients. Each attached client
//! gets a [`ClientConnection`] that turns [`ClientEvent`]s into session
//! commands and execution jobs, and owns the cancellation scope for all of
//! them.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::{format_error_for_status, Error};
use crate::events::{ClientEvent, CloseReason, ConnectionStatus, EventSink, ServerEvent};
use crate::exec::Executor;
use crate::probe::Prober;
use crate::registry::{ClientId, SessionRegistry};
use crate::session::{connect_with_timeout, Session, SessionCommand, SessionContext};
use crate::target::TargetDescriptor;
use crate::transport::Connector;

/// Shared gateway state.
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn Connector>,
    prober: Prober,
    executor: Executor,
    config: GatewayConfig,
}

impl Gateway {
    /// Create a gateway over `connector`.
    pub fn new(config: GatewayConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(SessionRegistry::new(config.teardown_timeout())),
            prober: Prober::new(config.probe_timeout()),
            executor: Executor::new(
                connector.clone(),
                config.execution.clone(),
                config.auth_timeout(),
            ),
            connector,
            config,
        })
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Active configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Attach a new client whose events go to `sink`.
    ///
    /// Emits `connected` and, with `probe_on_connect`, starts a connection
    /// test against the default target.
    pub fn attach(self: &Arc<Self>, sink: EventSink) -> ClientConnection {
        let client = ClientConnection {
            gateway: self.clone(),
            client_id: Uuid::new_v4(),
            target: None,
            sink,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            generation: 0,
        };
        info!(client_id = %client.client_id, "Client attached");

        client.sink.emit(ServerEvent::Connected {
            client_id: client.client_id.to_string(),
        });
        if self.config.probe_on_connect {
            if let Some(target) = self.config.default_target.clone() {
                client.spawn_connection_test(target);
            }
        }
        client
    }

    /// Probe and authenticate against `target` without opening a shell.
    ///
    /// Progress and result are reported as `connection-status` events.
    pub async fn test_connection(&self, target: &TargetDescriptor, sink: &EventSink) {
        sink.status(
            ConnectionStatus::Testing,
            format!("Testing connection to {}...", target.address()),
        );

        let result = async {
            self.prober
                .probe(&target.host, target.port)
                .await
                .into_result(&target.host, target.port)?;
            let conn =
                connect_with_timeout(self.connector.as_ref(), target, self.config.auth_timeout())
                    .await?;
            conn.disconnect().await;
            Ok::<_, Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(target = %target, "Connection test passed");
                sink.status(
                    ConnectionStatus::Connected,
                    format!("Successfully connected to {}", target.name),
                );
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Connection test failed");
                sink.status(ConnectionStatus::Error, format_error_for_status(&e));
            }
        }
    }
}

/// One attached client.
pub struct ClientConnection {
    gateway: Arc<Gateway>,
    client_id: ClientId,
    target: Option<TargetDescriptor>,
    sink: EventSink,
    cancel: CancellationToken,
    tasks: TaskTracker,
    generation: u64,
}

impl ClientConnection {
    /// Client id
    pub fn id(&self) -> ClientId {
        self.client_id
    }

    /// Target of the most recent `start-session`
    pub fn target(&self) -> Option<&TargetDescriptor> {
        self.target.as_ref()
    }

    /// Handle one text frame. Malformed frames are answered with `error`.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "Rejected frame");
                self.sink.emit(ServerEvent::from_error(&e));
            }
        }
    }

    /// Handle one client event.
    pub async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::StartSession(target) => self.start_session(target).await,
            ClientEvent::Input(bytes) => self.route(SessionCommand::Input(bytes)).await,
            ClientEvent::Resize(size) => self.route(SessionCommand::Resize(size)).await,
            ClientEvent::RunCommand(request) => {
                let job_id = self.gateway.executor.spawn(
                    request,
                    self.target.clone(),
                    self.sink.clone(),
                    self.cancel.child_token(),
                    &self.tasks,
                );
                debug!(client_id = %self.client_id, job_id = %job_id, "Execution job spawned");
            }
            ClientEvent::TestConnection(target) => {
                let target = target
                    .or_else(|| self.target.clone())
                    .or_else(|| self.gateway.config.default_target.clone());
                match target {
                    Some(target) => self.spawn_connection_test(target),
                    None => self.sink.status(
                        ConnectionStatus::Error,
                        format_error_for_status(&Error::NoTarget),
                    ),
                }
            }
            ClientEvent::CloseSession => {
                let removed = self
                    .gateway
                    .registry
                    .remove(self.client_id, CloseReason::ClientRequest)
                    .await;
                if !removed {
                    debug!(client_id = %self.client_id, "close-session without a session");
                }
            }
            ClientEvent::Ping => self.sink.emit(ServerEvent::Pong),
        }
    }

    /// Bookkeeping for an outbound event before it is written to the socket.
    ///
    /// A session that ended on its own is dropped from the registry here.
    pub async fn observe(&self, event: &ServerEvent) {
        if let ServerEvent::SessionClosed { session_id, .. } = event {
            self.gateway
                .registry
                .remove_if(self.client_id, session_id)
                .await;
        }
    }

    /// Tear down the session and every job. Call once, when the transport
    /// is gone.
    pub async fn close(self) {
        self.cancel.cancel();
        self.gateway
            .registry
            .remove(self.client_id, CloseReason::ClientDisconnected)
            .await;

        self.tasks.close();
        let bound = self.gateway.config.teardown_timeout();
        if tokio::time::timeout(bound, self.tasks.wait()).await.is_err() {
            warn!(
                client_id = %self.client_id,
                pending = self.tasks.len(),
                "Jobs still running after teardown bound"
            );
        }
        info!(client_id = %self.client_id, "Client detached");
    }

    async fn start_session(&mut self, target: TargetDescriptor) {
        self.generation += 1;
        let session_id = format!("{}-{}", self.client_id, self.generation);
        info!(client_id = %self.client_id, session_id = %session_id, target = %target, "Session requested");

        self.target = Some(target.clone());
        let ctx = SessionContext {
            connector: self.gateway.connector.clone(),
            prober: self.gateway.prober,
            auth_timeout: self.gateway.config.auth_timeout(),
            pty: self.gateway.config.pty.to_request(),
            sink: self.sink.clone(),
        };
        let session = Session::new(session_id, target, ctx, self.cancel.child_token());
        self.gateway.registry.put(self.client_id, session).await;
    }

    async fn route(&self, command: SessionCommand) {
        match self.gateway.registry.get(self.client_id).await {
            Some(session) => {
                if !session.send(command).await {
                    debug!(client_id = %self.client_id, session_id = %session.id(), "Session gone, dropping command");
                }
            }
            None => debug!(client_id = %self.client_id, "No session, dropping command"),
        }
    }

    fn spawn_connection_test(&self, target: TargetDescriptor) {
        let gateway = self.gateway.clone();
        let sink = self.sink.clone();
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = gateway.test_connection(&target, &sink) => {}
            }
        });
    }
}
