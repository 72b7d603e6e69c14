//! P1: for any sequence of connect/close calls, the underlying stream is
//! opened exactly once and closed exactly once, regardless of interleaving.
//! P5: closing twice is a no-op, and no background task outlives close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cs_connection::CodespaceConnection;
use cs_proto::{
    CodespaceDescriptor, CodespaceState, ConnectionInfo, RuntimeConstraints, TunnelProperties,
};
use cs_tunnel_client::{ClientError, DuplexStream, SessionMessage, StreamDialer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn descriptor() -> CodespaceDescriptor {
    CodespaceDescriptor {
        state: CodespaceState::Available,
        connection: ConnectionInfo {
            session_id: "sess-1".into(),
            session_token: "token-1".into(),
            relay_endpoint: "wss://relay.example.com".into(),
            relay_sas: "sas".into(),
            host_public_keys: vec![],
            tunnel_properties: TunnelProperties {
                service_uri: "https://global.rel.tunnels.example.com".into(),
                tunnel_id: "tun-1".into(),
                cluster_id: "usw2".into(),
                domain: "tunnels.example.com".into(),
                connect_access_token: "connect".into(),
                manage_ports_access_token: "manage".into(),
            },
        },
        runtime_constraints: RuntimeConstraints {
            allowed_port_privacy_settings: vec!["private".into(), "public".into()],
        },
    }
}

/// Dials an in-memory duplex and counts how many times a stream was
/// actually established, so the test can assert "opened exactly once".
struct CountingDialer {
    dial_count: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamDialer for CountingDialer {
    async fn dial(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Box<dyn DuplexStream>, ClientError> {
        self.dial_count.fetch_add(1, Ordering::SeqCst);
        let (client_side, host_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_fake_host(host_side));
        Ok(Box::new(client_side))
    }
}

async fn run_fake_host<S>(mut stream: S)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut len_buf = [0u8; 4];
    loop {
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        if stream.read_exact(&mut buf).await.is_err() {
            return;
        }
        let msg: SessionMessage = match serde_json::from_slice(&buf) {
            Ok(m) => m,
            Err(_) => return,
        };

        let reply = match msg {
            SessionMessage::Connect { .. } => Some(SessionMessage::ConnectAck {
                accepted: true,
                reason: None,
            }),
            SessionMessage::RefreshPorts => Some(SessionMessage::RefreshPortsAck),
            _ => None,
        };

        if let Some(reply) = reply {
            let payload = serde_json::to_vec(&reply).unwrap();
            if stream.write_u32(payload.len() as u32).await.is_err() {
                return;
            }
            if stream.write_all(&payload).await.is_err() {
                return;
            }
        }
    }
}

fn build_connection(dial_count: Arc<AtomicUsize>) -> CodespaceConnection {
    let dialer = Arc::new(CountingDialer { dial_count });
    CodespaceConnection::build_with_dialer(&descriptor(), reqwest::Client::new(), dialer).unwrap()
}

#[tokio::test]
async fn connect_opens_exactly_once_across_repeated_calls() {
    let dial_count = Arc::new(AtomicUsize::new(0));
    let connection = build_connection(dial_count.clone());
    let cancel = CancellationToken::new();

    connection.connect(&cancel).await.unwrap();
    connection.connect(&cancel).await.unwrap();
    connection.connect(&cancel).await.unwrap();

    assert_eq!(dial_count.load(Ordering::SeqCst), 1);
    assert!(connection.is_connected());
}

#[tokio::test]
async fn close_is_idempotent_and_leaves_no_task_running() {
    let dial_count = Arc::new(AtomicUsize::new(0));
    let connection = build_connection(dial_count);
    let cancel = CancellationToken::new();

    connection.connect(&cancel).await.unwrap();
    connection.close().await.unwrap();
    connection.close().await.unwrap();

    assert!(!connection.is_connected());

    tokio::time::timeout(Duration::from_secs(1), connection.close())
        .await
        .expect("close must not hang")
        .unwrap();
}

#[tokio::test]
async fn close_before_any_connect_is_a_no_op() {
    let dial_count = Arc::new(AtomicUsize::new(0));
    let connection = build_connection(dial_count.clone());

    connection.close().await.unwrap();
    assert_eq!(dial_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn interleaved_connect_close_still_opens_and_closes_exactly_once() {
    let dial_count = Arc::new(AtomicUsize::new(0));
    let connection = Arc::new(build_connection(dial_count.clone()));
    let cancel = CancellationToken::new();

    let a = {
        let connection = connection.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { connection.connect(&cancel).await })
    };
    let b = {
        let connection = connection.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { connection.connect(&cancel).await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(dial_count.load(Ordering::SeqCst), 1);
    connection.close().await.unwrap();
}
