use crate::error::ClientError;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Anything that looks like a full-duplex byte stream to the relay. The
/// production dialer hands back a TLS/WebSocket stream to the relay
/// endpoint; tests hand back one half of an in-process `tokio::io::duplex`.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

/// Establishes the raw duplex stream to the relay. Kept as a trait (rather
/// than baked into `Client`) so the handshake/mux logic in this crate can
/// be tested without a network, per spec.md §9's testability note.
#[async_trait]
pub trait StreamDialer: Send + Sync {
    async fn dial(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DuplexStream>, ClientError>;
}
