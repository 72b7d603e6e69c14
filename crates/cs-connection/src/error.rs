use cs_proto::{ErrorKind, HasErrorKind};
use cs_tunnel_client::ClientError;
use cs_tunnel_manager::ManagerError;
use thiserror::Error;

/// Errors raised while building or driving a Codespace Connection
/// (spec.md §4.3). Every fallible step is wrapped with the name of the
/// step that failed, per spec.md §7's propagation policy.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("{step} failed: {source}")]
    Manager {
        step: &'static str,
        #[source]
        source: ManagerError,
    },

    #[error("{step} failed: {source}")]
    Client {
        step: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("operation attempted after close")]
    ClosedConnection,

    #[error("operation canceled")]
    Canceled,

    #[error("invalid relay endpoint {0}")]
    InvalidRelayEndpoint(String),
}

impl HasErrorKind for ConnectionError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Manager { source, .. } => source.kind(),
            ConnectionError::Client { source, .. } => source.kind(),
            ConnectionError::ClosedConnection => ErrorKind::ClosedConnection,
            ConnectionError::Canceled => ErrorKind::Canceled,
            ConnectionError::InvalidRelayEndpoint(_) => ErrorKind::Transport,
        }
    }
}
