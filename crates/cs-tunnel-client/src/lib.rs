//! Tunnel Client (C2): owns the long-lived duplex stream to the relay and
//! performs SSH-style session multiplexing over it.

mod client;
mod codec;
mod dialer;
mod error;
mod message;
mod relay_dialer;
mod router;

pub use client::{Client, Connector};
pub use dialer::{DuplexStream, StreamDialer};
pub use error::ClientError;
pub use message::SessionMessage;
pub use relay_dialer::RelayDialer;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ChannelRouter;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    /// Dialer that hands back one end of an in-memory duplex and drives a
    /// minimal fake host on the other end: accepts the handshake and
    /// answers `RefreshPorts`/`QueryForwardedPort`/`ChannelOpen`.
    struct FakeHostDialer;

    #[async_trait]
    impl StreamDialer for FakeHostDialer {
        async fn dial(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Box<dyn DuplexStream>, ClientError> {
            let (client_side, host_side) = tokio::io::duplex(64 * 1024);
            tokio::spawn(run_fake_host(host_side));
            Ok(Box::new(client_side))
        }
    }

    async fn run_fake_host<S>(mut stream: S)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        use crate::codec::{read_message, write_message};

        loop {
            match read_message(&mut stream).await {
                Ok(Some(SessionMessage::Connect { .. })) => {
                    let _ = write_message(
                        &mut stream,
                        &SessionMessage::ConnectAck {
                            accepted: true,
                            reason: None,
                        },
                    )
                    .await;
                }
                Ok(Some(SessionMessage::RefreshPorts)) => {
                    let _ = write_message(&mut stream, &SessionMessage::RefreshPortsAck).await;
                }
                Ok(Some(SessionMessage::QueryForwardedPort { remote_port })) => {
                    let _ = write_message(
                        &mut stream,
                        &SessionMessage::PortForwarded { remote_port },
                    )
                    .await;
                }
                Ok(Some(SessionMessage::ChannelOpen { channel_id, .. })) => {
                    let _ = write_message(
                        &mut stream,
                        &SessionMessage::ChannelOpenConfirmation { channel_id },
                    )
                    .await;
                }
                Ok(Some(SessionMessage::ChannelData { channel_id, data })) => {
                    // Echo server: bounce data back on the same channel.
                    let _ = write_message(
                        &mut stream,
                        &SessionMessage::ChannelData { channel_id, data },
                    )
                    .await;
                }
                Ok(Some(SessionMessage::ChannelClose { .. })) | Ok(None) => break,
                Ok(Some(_)) => {}
                Err(_) => break,
            }
        }
    }

    fn connector() -> Connector {
        Connector::new(Arc::new(FakeHostDialer), "session-1".into(), "token".into())
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let client = connector().build();
        let cancel = CancellationToken::new();

        client.connect(&cancel).await.unwrap();
        assert!(client.is_connected());
        // Second call observes I1: already connected is a no-op, not an error.
        client.connect(&cancel).await.unwrap();
        assert!(client.is_connected());

        client.close().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn close_before_connect_is_a_no_op() {
        let client = connector().build();
        client.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_ports_completes() {
        let client = connector().build();
        let cancel = CancellationToken::new();
        client.connect(&cancel).await.unwrap();
        client.refresh_ports(&cancel).await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_forwarded_port_resolves() {
        let client = connector().build();
        let cancel = CancellationToken::new();
        client.connect(&cancel).await.unwrap();
        client
            .wait_for_forwarded_port(&cancel, 8080)
            .await
            .unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_forwarded_port_echoes_bytes() {
        let client = Arc::new(connector().build());
        let cancel = CancellationToken::new();
        client.connect(&cancel).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let pump_cancel = cancel.clone();
        let pump_client = client.clone();
        let pump = tokio::spawn(async move {
            pump_client
                .connect_to_forwarded_port(&pump_cancel, listener, 8080)
                .await
        });

        let mut conn = tokio::net::TcpStream::connect(local_addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        cancel.cancel();
        pump.await.unwrap().unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn operations_after_close_report_closed_connection() {
        let client = connector().build();
        let cancel = CancellationToken::new();
        client.connect(&cancel).await.unwrap();
        client.close().await.unwrap();

        let err = client.refresh_ports(&cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::ClosedConnection));
    }

    #[test]
    fn channel_router_is_constructible() {
        let _router = ChannelRouter::new();
    }
}
