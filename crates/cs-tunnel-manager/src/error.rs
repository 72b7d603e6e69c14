use cs_proto::{ErrorKind, HasErrorKind};
use thiserror::Error;

/// Errors raised by the Tunnel Manager (spec.md §4.1).
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("tunnel not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay returned unexpected status {status} for {step}: {body}")]
    UnexpectedStatus {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("failed to parse relay response for {step}: {source}")]
    Decode {
        step: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl HasErrorKind for ManagerError {
    fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::Unauthorized(_) => ErrorKind::Unauthorized,
            ManagerError::Transport(_) => ErrorKind::Transport,
            ManagerError::UnexpectedStatus { .. } => ErrorKind::Transport,
            ManagerError::Canceled => ErrorKind::Canceled,
            ManagerError::Decode { .. } => ErrorKind::Transport,
        }
    }
}
