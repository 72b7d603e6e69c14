use cs_proto::{ErrorKind, HasErrorKind};
use thiserror::Error;

/// Errors raised by the RPC Invoker (spec.md §4.5).
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("{step} failed: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed: {source}")]
    Session {
        step: &'static str,
        #[source]
        source: cs_connection::ConnectionError,
    },

    #[error("failed to dial internal rpc transport: {0}")]
    Dial(#[from] tonic::transport::Error),

    #[error("rpc call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("remote operation failed: {0}")]
    RemoteOperationFailed(String),

    #[error("failed to parse remote port {raw:?}: {source}")]
    ParseError {
        raw: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("operation attempted after close")]
    ClosedConnection,
}

impl HasErrorKind for InvokerError {
    fn kind(&self) -> ErrorKind {
        match self {
            InvokerError::Io { .. } | InvokerError::Dial(_) => ErrorKind::Transport,
            InvokerError::Session { source, .. } => source.kind(),
            InvokerError::Rpc(_) => ErrorKind::Transport,
            InvokerError::RemoteOperationFailed(_) => ErrorKind::RemoteOperationFailed,
            InvokerError::ParseError { .. } => ErrorKind::ParseError,
            InvokerError::Canceled => ErrorKind::Canceled,
            InvokerError::Timeout(_) => ErrorKind::Timeout,
            InvokerError::ClosedConnection => ErrorKind::ClosedConnection,
        }
    }
}
