use cs_proto::{ErrorKind, HasErrorKind};
use thiserror::Error;

/// Errors raised by the Tunnel Client (spec.md §4.2).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode/decode session message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("handshake rejected by host: {0}")]
    HandshakeRejected(String),

    #[error("operation attempted after close")]
    ClosedConnection,

    #[error("operation canceled")]
    Canceled,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("unexpected message while waiting for {expected}: {actual:?}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: crate::message::SessionMessage,
    },

    #[error("the control channel closed before completing {0}")]
    ControlChannelClosed(&'static str),

    #[error("failed to connect to relay {host}:{port}: {source}")]
    DialFailed {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("tls handshake with relay failed: {0}")]
    Tls(String),

    #[error("invalid relay address {0}")]
    InvalidAddress(String),
}

impl HasErrorKind for ClientError {
    fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Io(_) | ClientError::Codec(_) | ClientError::FrameTooLarge(_) => {
                ErrorKind::Transport
            }
            ClientError::HandshakeRejected(_) => ErrorKind::Unauthorized,
            ClientError::ClosedConnection => ErrorKind::ClosedConnection,
            ClientError::Canceled => ErrorKind::Canceled,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::UnexpectedMessage { .. } | ClientError::ControlChannelClosed(_) => {
                ErrorKind::Transport
            }
            ClientError::DialFailed { .. } | ClientError::Tls(_) | ClientError::InvalidAddress(_) => {
                ErrorKind::Transport
            }
        }
    }
}
