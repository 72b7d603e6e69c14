//! Port Forwarder (C4): the higher-level API over the Tunnel Manager and
//! Tunnel Client — create a tunnel port with a visibility policy, forward
//! it to a local TCP listener, update visibility, list ports, and
//! classify internal vs. user-forwarded ports (spec.md §4.4).

mod error;

pub use error::ForwarderError;

use std::sync::Arc;

use cs_connection::CodespaceConnection;
use cs_proto::{
    access_control_entries_to_visibility, visibility_to_access_control_entries, PortProtocol,
    PortTag, PortVisibility, TunnelPort,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Inputs to [`PortForwarder::forward_port`], mirroring the parameter list
/// of spec.md §4.4's `ForwardPort`.
pub struct ForwardPortOptions {
    pub remote_port: u16,
    pub listener: Option<TcpListener>,
    pub keep_alive: bool,
    pub connect: bool,
    pub internal: bool,
    pub visibility: Option<PortVisibility>,
}

impl ForwardPortOptions {
    pub fn new(remote_port: u16) -> Self {
        Self {
            remote_port,
            listener: None,
            keep_alive: false,
            connect: false,
            internal: false,
            visibility: None,
        }
    }
}

/// `keep_alive` is accepted for parity with the original contract but has
/// no effect beyond selecting which session name the port is tagged
/// with; this core leaves keep-alive scheduling to the caller.
pub struct PortForwarder {
    connection: Arc<CodespaceConnection>,
}

impl PortForwarder {
    pub fn new(connection: Arc<CodespaceConnection>) -> Self {
        Self { connection }
    }

    /// Implements spec.md §4.4's `ForwardPort` algorithm.
    pub async fn forward_port(
        &self,
        cancel: &CancellationToken,
        opts: ForwardPortOptions,
    ) -> Result<(), ForwarderError> {
        if opts.connect && opts.listener.is_none() {
            return Err(ForwarderError::MissingListener);
        }

        if let Some(visibility) = opts.visibility {
            if !self
                .connection
                .allowed_port_visibilities()
                .contains(&visibility)
            {
                return Err(ForwarderError::VisibilityNotAllowed {
                    requested: visibility.to_string(),
                });
            }
        }

        let port = build_tunnel_port(&opts);

        self.connection
            .manager()
            .create_tunnel_port(self.connection.tunnel(), port, cancel)
            .await
            .map_err(|source| ForwarderError::Manager {
                step: "create tunnel port",
                source,
            })?;

        let (done_tx, done_rx) = oneshot::channel();
        let client_handle = self.connection.clone();
        let pump_cancel = cancel.clone();
        let remote_port = opts.remote_port;
        let connect = opts.connect;
        let listener = opts.listener;

        tokio::spawn(async move {
            let result =
                run_forward_pump(&client_handle, &pump_cancel, remote_port, connect, listener)
                    .await;
            let _ = done_tx.send(result);
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(remote_port, "forward_port canceled by caller");
                Ok(())
            }
            result = done_rx => match result {
                Ok(inner) => inner,
                Err(_) => Ok(()),
            },
        }
    }

    /// Implements spec.md §4.4's `UpdatePortVisibility` algorithm.
    pub async fn update_port_visibility(
        &self,
        cancel: &CancellationToken,
        remote_port: u16,
        visibility: PortVisibility,
    ) -> Result<(), ForwarderError> {
        let current = self
            .connection
            .manager()
            .get_tunnel_port(self.connection.tunnel(), remote_port, cancel)
            .await
            .map_err(|source| ForwarderError::Manager {
                step: "get tunnel port",
                source,
            })?;

        if access_control_entries_to_visibility(&current.access_control_entries) == visibility {
            return Ok(());
        }

        self.connection
            .manager()
            .delete_tunnel_port(self.connection.tunnel(), remote_port, cancel)
            .await
            .map_err(|source| ForwarderError::Manager {
                step: "delete tunnel port",
                source,
            })?;

        self.connection
            .connect(cancel)
            .await
            .map_err(|e| ForwarderError::Client {
                step: "connect tunnel client",
                source: client_error_from_connection(e),
            })?;
        self.connection
            .refresh_ports(cancel)
            .await
            .map_err(|source| ForwarderError::Client {
                step: "refresh ports",
                source,
            })?;

        self.forward_port(
            cancel,
            ForwardPortOptions {
                remote_port,
                listener: None,
                keep_alive: false,
                connect: false,
                internal: false,
                visibility: Some(visibility),
            },
        )
        .await
    }

    /// Implements spec.md §4.4's `ListPorts`: a passthrough to the Tunnel
    /// Manager, propagating errors verbatim.
    pub async fn list_ports(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TunnelPort>, ForwarderError> {
        self.connection
            .manager()
            .list_tunnel_ports(self.connection.tunnel(), cancel)
            .await
            .map_err(|source| ForwarderError::Manager {
                step: "list tunnel ports",
                source,
            })
    }
}

/// `IsInternalPort` (spec.md §4.4): re-exported here as a free function so
/// callers of this crate don't need to reach into `cs-proto` directly.
pub fn is_internal_port(port: &TunnelPort) -> bool {
    port.is_internal()
}

fn build_tunnel_port(opts: &ForwardPortOptions) -> TunnelPort {
    let tag = if opts.internal {
        PortTag::InternalPort
    } else {
        PortTag::UserForwardedPort
    };
    let tag_name = match tag {
        PortTag::InternalPort => "InternalPort",
        PortTag::UserForwardedPort => "UserForwardedPort",
    };

    let access_control_entries = opts
        .visibility
        .map(visibility_to_access_control_entries)
        .unwrap_or_default();

    TunnelPort {
        port_number: opts.remote_port,
        protocol: PortProtocol::Http,
        tags: vec![tag_name.to_string()],
        access_control_entries,
    }
}

async fn run_forward_pump(
    connection: &CodespaceConnection,
    cancel: &CancellationToken,
    remote_port: u16,
    connect: bool,
    listener: Option<TcpListener>,
) -> Result<(), ForwarderError> {
    connection
        .connect(cancel)
        .await
        .map_err(|e| ForwarderError::Client {
            step: "connect tunnel client",
            source: client_error_from_connection(e),
        })?;

    connection
        .refresh_ports(cancel)
        .await
        .map_err(|source| ForwarderError::Client {
            step: "refresh ports",
            source,
        })?;

    if !connect {
        return Ok(());
    }

    let listener = listener.ok_or(ForwarderError::MissingListener)?;

    connection
        .wait_for_forwarded_port(cancel, remote_port)
        .await
        .map_err(|source| ForwarderError::Client {
            step: "wait for forwarded port",
            source,
        })?;

    connection
        .connect_to_forwarded_port(cancel, listener, remote_port)
        .await
        .map_err(|source| ForwarderError::Client {
            step: "connect to forwarded port",
            source,
        })
}

/// `CodespaceConnection::connect`/`close` wrap `ClientError` in their own
/// `ConnectionError`; the pump needs the inner error to report the same
/// step vocabulary the rest of this module uses.
fn client_error_from_connection(e: cs_connection::ConnectionError) -> cs_tunnel_client::ClientError {
    match e {
        cs_connection::ConnectionError::Client { source, .. } => source,
        other => {
            warn!(error = %other, "unexpected connection error while forwarding a port");
            cs_tunnel_client::ClientError::ClosedConnection
        }
    }
}
