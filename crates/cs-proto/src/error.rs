use std::fmt;

/// The error taxonomy shared across every core component (spec.md §7).
///
/// Individual crates define their own `thiserror` enums for the errors
/// they can actually produce, but each one exposes a `kind()` that maps
/// back into this set so callers can match on a single vocabulary
/// regardless of which component raised the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, DNS, TLS, or HTTP/gRPC transport failure.
    Transport,
    /// Expired or wrong-scope access token.
    Unauthorized,
    /// Tunnel or port disappeared.
    NotFound,
    /// Port already exists; tolerated by callers during creation.
    Conflict,
    /// Propagated context cancellation.
    Canceled,
    /// Propagated context deadline.
    Timeout,
    /// RPC returned `result = false`.
    RemoteOperationFailed,
    /// Requested visibility absent from `allowed_port_visibilities`.
    VisibilityNotAllowed,
    /// Could not parse a stringified port number.
    ParseError,
    /// Operation attempted after `close()`.
    ClosedConnection,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RemoteOperationFailed => "remote operation failed",
            ErrorKind::VisibilityNotAllowed => "visibility not allowed",
            ErrorKind::ParseError => "parse error",
            ErrorKind::ClosedConnection => "closed connection",
        };
        f.write_str(s)
    }
}

/// Implemented by every component error enum so callers can inspect the
/// taxonomy without downcasting to a concrete type.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}
