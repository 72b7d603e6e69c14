//! P2: updating to an allowed visibility terminates with success and the
//! port's ACL round-trips back to the requested visibility.
//! P3: requesting a visibility absent from the allow-list fails fast and
//! issues no REST calls.
//! Scenario 5/6 from spec.md §8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cs_connection::CodespaceConnection;
use cs_port_forwarder::{ForwardPortOptions, ForwarderError, PortForwarder};
use cs_proto::{
    access_control_entries_to_visibility, visibility_to_access_control_entries,
    CodespaceDescriptor, CodespaceState, ConnectionInfo, PortProtocol, PortVisibility,
    RuntimeConstraints, Tunnel, TunnelDescriptor, TunnelPort, TunnelProperties,
};
use cs_tunnel_client::{ClientError, DuplexStream, SessionMessage, StreamDialer};
use cs_tunnel_manager::{ManagerError, TunnelManager, TunnelRequestOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn descriptor(allowed: &[&str]) -> CodespaceDescriptor {
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
            allowed_port_privacy_settings: allowed.iter().map(|s| s.to_string()).collect(),
        },
    }
}

/// Records every call it receives and keeps an in-memory port table, so
/// tests can assert both outcomes and "no REST calls issued" (P3).
#[derive(Default)]
struct FakeManager {
    ports: Mutex<Vec<TunnelPort>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    get_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeManager {
    fn total_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
            + self.delete_calls.load(Ordering::SeqCst)
            + self.get_calls.load(Ordering::SeqCst)
            + self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelManager for FakeManager {
    async fn get_tunnel(
        &self,
        descriptor: &TunnelDescriptor,
        _opts: TunnelRequestOptions,
        _cancel: &CancellationToken,
    ) -> Result<Tunnel, ManagerError> {
        Ok(Tunnel {
            descriptor: descriptor.clone(),
            ports: self.ports.lock().unwrap().clone(),
        })
    }

    async fn create_tunnel_port(
        &self,
        _tunnel: &Tunnel,
        port: TunnelPort,
        _cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut ports = self.ports.lock().unwrap();
        ports.retain(|p| p.port_number != port.port_number);
        ports.push(port);
        Ok(())
    }

    async fn delete_tunnel_port(
        &self,
        _tunnel: &Tunnel,
        port_number: u16,
        _cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.ports.lock().unwrap().retain(|p| p.port_number != port_number);
        Ok(())
    }

    async fn list_tunnel_ports(
        &self,
        _tunnel: &Tunnel,
        _cancel: &CancellationToken,
    ) -> Result<Vec<TunnelPort>, ManagerError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ports.lock().unwrap().clone())
    }

    async fn get_tunnel_port(
        &self,
        _tunnel: &Tunnel,
        port_number: u16,
        _cancel: &CancellationToken,
    ) -> Result<TunnelPort, ManagerError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.ports
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.port_number == port_number)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("port {port_number}")))
    }
}

struct FakeHostDialer;

#[async_trait]
impl StreamDialer for FakeHostDialer {
    async fn dial(&self, _cancel: &CancellationToken) -> Result<Box<dyn DuplexStream>, ClientError> {
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

fn build(allowed: &[&str]) -> (Arc<CodespaceConnection>, Arc<FakeManager>) {
    let manager = Arc::new(FakeManager::default());
    let connection = CodespaceConnection::build_with_parts(
        &descriptor(allowed),
        manager.clone(),
        Arc::new(FakeHostDialer),
    )
    .unwrap();
    (Arc::new(connection), manager)
}

#[tokio::test]
async fn visibility_round_trip_through_update_and_list() {
    let (connection, manager) = build(&["organization", "public"]);
    let forwarder = PortForwarder::new(connection);
    let cancel = CancellationToken::new();

    forwarder
        .forward_port(
            &cancel,
            ForwardPortOptions {
                remote_port: 8080,
                listener: None,
                keep_alive: false,
                connect: false,
                internal: false,
                visibility: Some(PortVisibility::Organization),
            },
        )
        .await
        .unwrap();

    let ports = forwarder.list_ports(&cancel).await.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(
        access_control_entries_to_visibility(&ports[0].access_control_entries),
        PortVisibility::Organization
    );

    forwarder
        .update_port_visibility(&cancel, 8080, PortVisibility::Public)
        .await
        .unwrap();

    let ports = forwarder.list_ports(&cancel).await.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(
        access_control_entries_to_visibility(&ports[0].access_control_entries),
        PortVisibility::Public
    );

    // Re-requesting the same visibility is a no-op: no further delete.
    let deletes_before = manager.delete_calls.load(Ordering::SeqCst);
    forwarder
        .update_port_visibility(&cancel, 8080, PortVisibility::Public)
        .await
        .unwrap();
    assert_eq!(manager.delete_calls.load(Ordering::SeqCst), deletes_before);
}

#[tokio::test]
async fn disallowed_visibility_is_rejected_with_no_rest_calls() {
    let (connection, manager) = build(&["private"]);
    let forwarder = PortForwarder::new(connection);
    let cancel = CancellationToken::new();

    let err = forwarder
        .forward_port(
            &cancel,
            ForwardPortOptions {
                remote_port: 9090,
                listener: None,
                keep_alive: false,
                connect: false,
                internal: false,
                visibility: Some(PortVisibility::Public),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ForwarderError::VisibilityNotAllowed { .. }));
    assert_eq!(manager.total_calls(), 0);
}

#[tokio::test]
async fn empty_acl_entries_classify_as_private() {
    let port = TunnelPort {
        port_number: 1234,
        protocol: PortProtocol::Http,
        tags: vec!["UserForwardedPort".to_string()],
        access_control_entries: vec![],
    };
    assert_eq!(
        access_control_entries_to_visibility(&port.access_control_entries),
        PortVisibility::Private
    );
    assert!(!cs_port_forwarder::is_internal_port(&port));
}

#[tokio::test]
async fn forward_port_without_visibility_skips_acl_check() {
    let (connection, manager) = build(&[]);
    let forwarder = PortForwarder::new(connection);
    let cancel = CancellationToken::new();

    forwarder
        .forward_port(&cancel, ForwardPortOptions::new(9999))
        .await
        .unwrap();

    assert_eq!(manager.create_calls.load(Ordering::SeqCst), 1);
    let entries = visibility_to_access_control_entries(PortVisibility::Private);
    assert!(!entries.is_empty());
}
