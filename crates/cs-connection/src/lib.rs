//! Codespace Connection (C3): the composition root. Builds the Tunnel
//! Manager and Tunnel Client from a codespace descriptor and serializes
//! `connect`/`close` under a single mutex, exactly as spec.md §4.3 and
//! §5 describe — "Connect and Close are serialized by a mutex; while one
//! is in progress the other waits."

mod error;

pub use error::ConnectionError;

use std::sync::Arc;

use cs_proto::{CodespaceDescriptor, PortVisibility, Tunnel, TunnelDescriptor};
use cs_tunnel_client::{Client, Connector, RelayDialer, StreamDialer};
use cs_tunnel_manager::{RestTunnelManager, TunnelManager};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A built, not-yet-connected (or connected) handle to a codespace's
/// tunnel. `connected` lives here, not in `cs-tunnel-client`, per spec.md
/// §4.2's "the client does not hold its own mutex for this".
pub struct CodespaceConnection {
    manager: Arc<dyn TunnelManager>,
    client: Client,
    tunnel: Tunnel,
    allowed_port_visibilities: Vec<PortVisibility>,
    connected: AsyncMutex<bool>,
}

impl CodespaceConnection {
    /// Performs steps 1–3 of spec.md §4.3: construct the Tunnel Manager,
    /// build the `Tunnel` handle from the descriptor's two access tokens,
    /// and pre-build a Tunnel Client that is not yet connected. Failure at
    /// any step aborts before anything requiring cleanup exists — nothing
    /// is opened until `connect` is called.
    pub fn build(
        descriptor: &CodespaceDescriptor,
        http_client: reqwest::Client,
    ) -> Result<Self, ConnectionError> {
        let (host, port) = parse_relay_endpoint(&descriptor.connection.relay_endpoint)?;
        let dialer: Arc<dyn StreamDialer> = Arc::new(RelayDialer::new(host, port));
        Self::build_with_dialer(descriptor, http_client, dialer)
    }

    /// Same as [`build`](Self::build) but with the stream dialer injected,
    /// so tests can substitute an in-memory duplex for the real relay
    /// (spec.md §9's "interface boundaries for testability").
    pub fn build_with_dialer(
        descriptor: &CodespaceDescriptor,
        http_client: reqwest::Client,
        dialer: Arc<dyn StreamDialer>,
    ) -> Result<Self, ConnectionError> {
        let manager: Arc<dyn TunnelManager> = Arc::new(RestTunnelManager::with_client(http_client));
        Self::build_with_parts(descriptor, manager, dialer)
    }

    /// Same as [`build`](Self::build) but with both the Tunnel Manager and
    /// the stream dialer injected, so `cs-port-forwarder`'s tests can run
    /// against fakes for both without touching a live relay.
    pub fn build_with_parts(
        descriptor: &CodespaceDescriptor,
        manager: Arc<dyn TunnelManager>,
        dialer: Arc<dyn StreamDialer>,
    ) -> Result<Self, ConnectionError> {
        let props = &descriptor.connection.tunnel_properties;
        let tunnel_descriptor = TunnelDescriptor {
            tunnel_id: props.tunnel_id.clone(),
            cluster_id: props.cluster_id.clone(),
            domain: props.domain.clone(),
            service_uri: props.service_uri.clone(),
            connect_token: props.connect_access_token.clone(),
            manage_ports_token: props.manage_ports_access_token.clone(),
        };
        let tunnel = Tunnel::new(tunnel_descriptor);

        let client = Connector::new(
            dialer,
            descriptor.connection.session_id.clone(),
            descriptor.connection.session_token.clone(),
        )
        .build();

        Ok(Self {
            manager,
            client,
            tunnel,
            allowed_port_visibilities: descriptor.allowed_port_visibilities(),
            connected: AsyncMutex::new(false),
        })
    }

    /// Establishes the tunnel client's stream. A no-op if already
    /// connected (I1); serialized against `close` by `self.connected`'s
    /// mutex (I2).
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectionError::Canceled),
            result = self.client.connect(cancel) => {
                result.map_err(|source| ConnectionError::Client {
                    step: "connect tunnel client",
                    source,
                })?;
            }
        }

        info!(tunnel_id = %self.tunnel.descriptor.tunnel_id, "codespace connection established");
        *connected = true;
        Ok(())
    }

    /// Tears down the tunnel client's stream. Idempotent (I3): closing
    /// before a successful connect, or closing twice, is a no-op (I4).
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            return Ok(());
        }

        self.client
            .close()
            .await
            .map_err(|source| ConnectionError::Client {
                step: "close tunnel client",
                source,
            })?;
        *connected = false;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.try_lock().map(|c| *c).unwrap_or(true)
    }

    pub fn manager(&self) -> Arc<dyn TunnelManager> {
        self.manager.clone()
    }

    pub fn tunnel(&self) -> &Tunnel {
        &self.tunnel
    }

    pub fn allowed_port_visibilities(&self) -> &[PortVisibility] {
        &self.allowed_port_visibilities
    }
}

impl std::ops::Deref for CodespaceConnection {
    type Target = Client;

    /// `cs-port-forwarder` drives the tunnel client directly (refresh,
    /// wait-for-port, connect-to-port) once the connection is up; this
    /// avoids re-exposing every `Client` method as a forwarding wrapper.
    fn deref(&self) -> &Client {
        &self.client
    }
}

fn parse_relay_endpoint(relay_endpoint: &str) -> Result<(String, u16), ConnectionError> {
    let url = url::Url::parse(relay_endpoint)
        .map_err(|_| ConnectionError::InvalidRelayEndpoint(relay_endpoint.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| ConnectionError::InvalidRelayEndpoint(relay_endpoint.to_string()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);
    Ok((host, port))
}
