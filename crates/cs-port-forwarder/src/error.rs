use cs_proto::{ErrorKind, HasErrorKind};
use cs_tunnel_client::ClientError;
use cs_tunnel_manager::ManagerError;
use thiserror::Error;

/// Errors raised by the Port Forwarder (spec.md §4.4).
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("visibility {requested} is not in the codespace's allowed list")]
    VisibilityNotAllowed { requested: String },

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

    #[error("operation canceled")]
    Canceled,

    #[error("forward_port requires a listener when connect=true")]
    MissingListener,
}

impl HasErrorKind for ForwarderError {
    fn kind(&self) -> ErrorKind {
        match self {
            ForwarderError::VisibilityNotAllowed { .. } => ErrorKind::VisibilityNotAllowed,
            ForwarderError::Manager { source, .. } => source.kind(),
            ForwarderError::Client { source, .. } => source.kind(),
            ForwarderError::Canceled => ErrorKind::Canceled,
            ForwarderError::MissingListener => ErrorKind::Transport,
        }
    }
}
