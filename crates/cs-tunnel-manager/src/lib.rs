//! Tunnel Manager (C1): a thin, typed REST client over the relay service
//! that backs a codespace tunnel.
//!
//! Grounded in the teacher's `reqwest`-based relay clients: every request
//! carries a fixed `User-Agent`, maps HTTP status codes onto the shared
//! error taxonomy, and treats cancellation as a first-class input rather
//! than an afterthought.

mod error;

pub use error::ManagerError;

use async_trait::async_trait;
use cs_proto::{Tunnel, TunnelDescriptor, TunnelPort};
use reqwest::{header, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const USER_AGENT: &str = "gh";

/// Options accepted by `get_tunnel` / `get_tunnel_port` / `list_tunnel_ports`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelRequestOptions {
    /// Whether `get_tunnel` should also return the tunnel's port list.
    pub include_ports: bool,
}

/// Capability boundary for the Tunnel Manager, so `cs-port-forwarder` and
/// `cs-connection` can be tested against a mock instead of a live relay
/// (spec.md §9 "Interface boundaries for testability").
#[async_trait]
pub trait TunnelManager: Send + Sync {
    async fn get_tunnel(
        &self,
        descriptor: &TunnelDescriptor,
        opts: TunnelRequestOptions,
        cancel: &CancellationToken,
    ) -> Result<Tunnel, ManagerError>;

    async fn create_tunnel_port(
        &self,
        tunnel: &Tunnel,
        port: TunnelPort,
        cancel: &CancellationToken,
    ) -> Result<(), ManagerError>;

    async fn delete_tunnel_port(
        &self,
        tunnel: &Tunnel,
        port_number: u16,
        cancel: &CancellationToken,
    ) -> Result<(), ManagerError>;

    async fn list_tunnel_ports(
        &self,
        tunnel: &Tunnel,
        cancel: &CancellationToken,
    ) -> Result<Vec<TunnelPort>, ManagerError>;

    async fn get_tunnel_port(
        &self,
        tunnel: &Tunnel,
        port_number: u16,
        cancel: &CancellationToken,
    ) -> Result<TunnelPort, ManagerError>;
}

/// `reqwest`-backed implementation of [`TunnelManager`].
pub struct RestTunnelManager {
    http: reqwest::Client,
}

impl RestTunnelManager {
    pub fn new() -> Result<Self, ManagerError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http })
    }

    /// Build a client around a caller-supplied `reqwest::Client` (e.g. one
    /// already configured with proxy settings by the external collaborator).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn ports_url(descriptor: &TunnelDescriptor) -> String {
        format!(
            "{}/tunnels/{}/ports",
            descriptor.service_uri.trim_end_matches('/'),
            descriptor.tunnel_id
        )
    }

    fn port_url(descriptor: &TunnelDescriptor, port_number: u16) -> String {
        format!("{}/{}", Self::ports_url(descriptor), port_number)
    }

    fn tunnel_url(descriptor: &TunnelDescriptor) -> String {
        format!(
            "{}/tunnels/{}",
            descriptor.service_uri.trim_end_matches('/'),
            descriptor.tunnel_id
        )
    }

    async fn run<F, T>(cancel: &CancellationToken, step: &'static str, fut: F) -> Result<T, ManagerError>
    where
        F: std::future::Future<Output = Result<T, ManagerError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(step, "tunnel manager request canceled");
                Err(ManagerError::Canceled)
            }
            result = fut => result,
        }
    }

    fn status_error(step: &'static str, status: StatusCode, body: String) -> ManagerError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ManagerError::Unauthorized(format!("{step}: {body}"))
            }
            StatusCode::NOT_FOUND => ManagerError::NotFound(format!("{step}: {body}")),
            other => ManagerError::UnexpectedStatus {
                step,
                status: other.as_u16(),
                body,
            },
        }
    }
}

#[async_trait]
impl TunnelManager for RestTunnelManager {
    async fn get_tunnel(
        &self,
        descriptor: &TunnelDescriptor,
        opts: TunnelRequestOptions,
        cancel: &CancellationToken,
    ) -> Result<Tunnel, ManagerError> {
        let http = self.http.clone();
        let url = Self::tunnel_url(descriptor);
        let token = descriptor.manage_ports_token.clone();
        let include_ports = opts.include_ports;

        Self::run(cancel, "get tunnel", async move {
            let resp = http
                .get(&url)
                .bearer_auth(&token)
                .query(&[("includePorts", include_ports)])
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::status_error("get tunnel", status, body));
            }

            let ports: Vec<TunnelPort> = if include_ports {
                resp.json().await.map_err(ManagerError::Transport)?
            } else {
                Vec::new()
            };

            Ok(Tunnel {
                descriptor: descriptor.clone(),
                ports,
            })
        })
        .await
    }

    async fn create_tunnel_port(
        &self,
        tunnel: &Tunnel,
        port: TunnelPort,
        cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        let http = self.http.clone();
        let url = Self::ports_url(&tunnel.descriptor);
        let token = tunnel.descriptor.manage_ports_token.clone();

        Self::run(cancel, "create tunnel port", async move {
            let resp = http.post(&url).bearer_auth(&token).json(&port).send().await?;
            let status = resp.status();

            // A conflict response means the port already exists; that is
            // not a fatal error at the semantic level (spec.md §4.1).
            if status == StatusCode::CONFLICT {
                debug!(port = port.port_number, "create tunnel port: already exists");
                return Ok(());
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::status_error("create tunnel port", status, body));
            }

            Ok(())
        })
        .await
    }

    async fn delete_tunnel_port(
        &self,
        tunnel: &Tunnel,
        port_number: u16,
        cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        let http = self.http.clone();
        let url = Self::port_url(&tunnel.descriptor, port_number);
        let token = tunnel.descriptor.manage_ports_token.clone();

        Self::run(cancel, "delete tunnel port", async move {
            let resp = http
                .delete(&url)
                .header(header::CONTENT_LENGTH, "0")
                .bearer_auth(&token)
                .send()
                .await?;
            let status = resp.status();

            // Cleanup paths must treat "already gone" as success
            // (spec.md §7, rule 3).
            if status == StatusCode::NOT_FOUND {
                warn!(port_number, "delete tunnel port: already absent");
                return Ok(());
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::status_error("delete tunnel port", status, body));
            }

            Ok(())
        })
        .await
    }

    async fn list_tunnel_ports(
        &self,
        tunnel: &Tunnel,
        cancel: &CancellationToken,
    ) -> Result<Vec<TunnelPort>, ManagerError> {
        let http = self.http.clone();
        let url = Self::ports_url(&tunnel.descriptor);
        let token = tunnel.descriptor.manage_ports_token.clone();

        Self::run(cancel, "list tunnel ports", async move {
            let resp = http.get(&url).bearer_auth(&token).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::status_error("list tunnel ports", status, body));
            }
            resp.json().await.map_err(ManagerError::Transport)
        })
        .await
    }

    async fn get_tunnel_port(
        &self,
        tunnel: &Tunnel,
        port_number: u16,
        cancel: &CancellationToken,
    ) -> Result<TunnelPort, ManagerError> {
        let http = self.http.clone();
        let url = Self::port_url(&tunnel.descriptor, port_number);
        let token = tunnel.descriptor.manage_ports_token.clone();

        Self::run(cancel, "get tunnel port", async move {
            let resp = http.get(&url).bearer_auth(&token).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::status_error("get tunnel port", status, body));
            }
            resp.json().await.map_err(ManagerError::Transport)
        })
        .await
    }
}
