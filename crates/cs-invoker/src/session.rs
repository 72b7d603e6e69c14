use std::sync::Arc;

use async_trait::async_trait;
use cs_connection::CodespaceConnection;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::InvokerError;

/// The minimal capability set the Invoker needs from its host connection
/// (spec.md §9: "a minimal capability set rather than a concrete type, so
/// test doubles can substitute a loopback-backed session"). Production
/// code gets this from [`ConnectionSession`]; tests can substitute a
/// session that shuttles bytes to an in-process gRPC server directly.
#[async_trait]
pub trait Session: Send + Sync {
    /// The reason reported to the host on the next heartbeat.
    async fn get_keep_alive_reason(&self) -> String;

    /// Forwards `remote_port` to `listener` until `cancel` fires or the
    /// underlying stream closes.
    async fn open_channel(
        &self,
        cancel: &CancellationToken,
        listener: TcpListener,
        remote_port: u16,
    ) -> Result<(), InvokerError>;
}

/// Default [`Session`] backed by a live [`CodespaceConnection`]: opening a
/// channel means connecting (if needed) and pumping the forwarded port
/// the same way `cs-port-forwarder` does for user-visible ports, minus
/// the port-creation step — the internal RPC port always exists.
pub struct ConnectionSession {
    connection: Arc<CodespaceConnection>,
    keep_alive_reason: AsyncMutex<String>,
}

impl ConnectionSession {
    pub fn new(connection: Arc<CodespaceConnection>) -> Self {
        Self {
            connection,
            keep_alive_reason: AsyncMutex::new("connected".to_string()),
        }
    }

    /// Lets the embedding CLI report a richer reason (e.g. `port-forwarded`,
    /// `rebuilding`) on the next heartbeat, per spec.md §3's
    /// `KeepAliveReason` definition.
    pub async fn set_keep_alive_reason(&self, reason: impl Into<String>) {
        *self.keep_alive_reason.lock().await = reason.into();
    }
}

#[async_trait]
impl Session for ConnectionSession {
    async fn get_keep_alive_reason(&self) -> String {
        self.keep_alive_reason.lock().await.clone()
    }

    async fn open_channel(
        &self,
        cancel: &CancellationToken,
        listener: TcpListener,
        remote_port: u16,
    ) -> Result<(), InvokerError> {
        self.connection
            .connect(cancel)
            .await
            .map_err(|source| InvokerError::Session {
                step: "connect tunnel client",
                source,
            })?;

        self.connection
            .connect_to_forwarded_port(cancel, listener, remote_port)
            .await
            .map_err(|source| InvokerError::Session {
                step: "connect to forwarded port",
                source: cs_connection_client_error(source),
            })
    }
}

/// `CodespaceConnection` derefs to `cs_tunnel_client::Client`, whose
/// errors don't carry the `ConnectionError` wrapper this module uses
/// everywhere else; fold them into the same step-tagged shape.
fn cs_connection_client_error(
    source: cs_tunnel_client::ClientError,
) -> cs_connection::ConnectionError {
    cs_connection::ConnectionError::Client {
        step: "connect to forwarded port",
        source,
    }
}
