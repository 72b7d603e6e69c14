//! RPC Invoker (C5): dials a gRPC client whose transport is a port
//! forwarded, through the tunnel, to the codespace's fixed internal RPC
//! port, and exposes the lifecycle operations that run over it
//! (spec.md §4.5).

mod error;
mod session;

pub use error::InvokerError;
pub use session::{ConnectionSession, Session};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cs_proto::rpc::codespace_host_service_client::CodespaceHostServiceClient;
use cs_proto::rpc::{
    NotifyCodespaceOfClientActivityRequest, RebuildContainerRequest, StartRemoteServerRequest,
    StartSshServerRequest,
};
use cs_proto::INTERNAL_RPC_PORT;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

/// Bounds construction's dial phase (spec.md §5 timeouts table).
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-RPC request deadline (spec.md §5).
const RPC_TIMEOUT: Duration = Duration::from_secs(30);
/// Heartbeat cadence (spec.md §5).
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// The literal placeholder bearer token spec.md §9 says to keep rather
/// than invent real inner-tunnel authentication for.
pub const PLACEHOLDER_BEARER_TOKEN: &str = "token";

/// `(port, url)` returned by [`Invoker::start_notebook_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookServer {
    pub port: u16,
    pub url: String,
}

/// `(port, user)` returned by [`Invoker::start_ssh_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshServer {
    pub port: u16,
    pub user: String,
}

#[derive(Debug, Clone, Default)]
pub struct StartSshServerOptions {
    pub user_public_key_file: Option<std::path::PathBuf>,
}

/// A constructed, live RPC Invoker. See spec.md §4.5 for the state
/// machine this implements: `Init → Connecting → Ready → Closing → Closed`,
/// with `Connecting → Failed` running the compensating cleanup below.
pub struct Invoker {
    client: CodespaceHostServiceClient<Channel>,
    bearer_token: String,
    client_id: String,
    pf_cancel: CancellationToken,
    pump_task: AsyncMutex<Option<JoinHandle<()>>>,
    heartbeat_task: AsyncMutex<Option<JoinHandle<()>>>,
    closed: AsyncMutex<bool>,
}

impl Invoker {
    /// Implements spec.md §4.5's `CreateInvoker` algorithm steps 1–8.
    pub async fn create(
        ctx: &CancellationToken,
        session: Arc<dyn Session>,
    ) -> Result<Self, InvokerError> {
        Self::create_with_token(ctx, session, PLACEHOLDER_BEARER_TOKEN, "gh-cli").await
    }

    pub async fn create_with_token(
        ctx: &CancellationToken,
        session: Arc<dyn Session>,
        bearer_token: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, InvokerError> {
        Self::create_with_heartbeat_period(ctx, session, bearer_token, client_id, HEARTBEAT_PERIOD)
            .await
    }

    /// Same as [`create_with_token`](Self::create_with_token) but with the
    /// heartbeat cadence injected, so tests can exercise cancellation
    /// during an in-flight heartbeat RPC without waiting out the real
    /// `HEARTBEAT_PERIOD`.
    pub async fn create_with_heartbeat_period(
        ctx: &CancellationToken,
        session: Arc<dyn Session>,
        bearer_token: impl Into<String>,
        client_id: impl Into<String>,
        heartbeat_period: Duration,
    ) -> Result<Self, InvokerError> {
        let bearer_token = bearer_token.into();
        let client_id = client_id.into();

        // Step 1: allocate the ephemeral loopback listener.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|source| InvokerError::Io {
                step: "bind invoker listener",
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| InvokerError::Io {
            step: "read invoker listener address",
            source,
        })?;

        // Step 2: a cancellation scope dedicated to the inner pump,
        // linked to (but independent of) the outer `ctx` (spec.md §9's
        // two-tier cancellation note).
        let pf_cancel = ctx.child_token();

        // Step 3: forward the internal RPC port to the listener in the
        // background, bound to `pf_cancel`.
        let pump_session = session.clone();
        let pump_cancel = pf_cancel.clone();
        let pump_task = tokio::spawn(async move {
            if let Err(e) = pump_session
                .open_channel(&pump_cancel, listener, INTERNAL_RPC_PORT)
                .await
            {
                warn!(error = %e, "invoker port-forward pump ended with error");
            }
        });

        // Step 4+5: dial gRPC with blocking-connect semantics, racing the
        // outer ctx and a construction timeout.
        let dial = async {
            let endpoint = Endpoint::from_shared(format!("http://{local_addr}"))
                .map_err(InvokerError::Dial)?
                .connect_timeout(DIAL_TIMEOUT);
            endpoint.connect().await.map_err(InvokerError::Dial)
        };

        let channel = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                pf_cancel.cancel();
                pump_task.abort();
                return Err(InvokerError::Canceled);
            }
            result = tokio::time::timeout(DIAL_TIMEOUT, dial) => match result {
                Ok(Ok(channel)) => channel,
                Ok(Err(e)) => {
                    // Step 6: compensating cleanup on dial failure.
                    pf_cancel.cancel();
                    pump_task.abort();
                    return Err(e);
                }
                Err(_) => {
                    pf_cancel.cancel();
                    pump_task.abort();
                    return Err(InvokerError::Timeout("invoker dial"));
                }
            },
        };

        let client = CodespaceHostServiceClient::new(channel);
        info!(%local_addr, "invoker connected to internal rpc transport");

        let invoker = Self {
            client,
            bearer_token,
            client_id,
            pf_cancel,
            pump_task: AsyncMutex::new(Some(pump_task)),
            heartbeat_task: AsyncMutex::new(None),
            closed: AsyncMutex::new(false),
        };

        // Step 7: best-effort initial "connected" notification, issued
        // before the heartbeat task starts (spec.md §5 ordering guarantee,
        // property P6).
        if let Err(e) = invoker.notify_client_activity("connected").await {
            debug!(error = %e, "initial connected notification failed, ignoring");
        }

        // Step 8: periodic heartbeat, gated on `pf_cancel` (I7).
        let heartbeat_task = invoker.spawn_heartbeat(session, heartbeat_period);
        *invoker.heartbeat_task.lock().await = Some(heartbeat_task);

        Ok(invoker)
    }

    fn spawn_heartbeat(&self, session: Arc<dyn Session>, heartbeat_period: Duration) -> JoinHandle<()> {
        let mut client = self.client.clone();
        let bearer_token = self.bearer_token.clone();
        let client_id = self.client_id.clone();
        let cancel = self.pf_cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_period);
            interval.tick().await; // first tick fires immediately; skip it.
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        if run_heartbeat_tick(&mut client, &bearer_token, &client_id, &session, &cancel).await.is_break() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn notify_client_activity(&self, reason: &str) -> Result<(), InvokerError> {
        let mut client = self.client.clone();
        call_notify(&mut client, &self.bearer_token, &self.client_id, reason).await
    }

    fn authed_request<T>(&self, message: T) -> Result<tonic::Request<T>, InvokerError> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(RPC_TIMEOUT);
        let value = format!("Bearer {}", self.bearer_token)
            .parse()
            .map_err(|_| InvokerError::RemoteOperationFailed("invalid bearer token".into()))?;
        request.metadata_mut().insert("authorization", value);
        Ok(request)
    }

    /// `StartNotebookServer` (spec.md §4.5 table).
    pub async fn start_notebook_server(&self) -> Result<NotebookServer, InvokerError> {
        self.ensure_open().await?;
        let mut client = self.client.clone();
        let request = self.authed_request(StartRemoteServerRequest {})?;
        let response = client.start_remote_server(request).await?.into_inner();

        if !response.result {
            return Err(InvokerError::RemoteOperationFailed(response.message));
        }

        let port: u16 = response
            .port
            .parse()
            .map_err(|source| InvokerError::ParseError {
                raw: response.port.clone(),
                source,
            })?;
        let url = format!("http://localhost:{port}?token={port}");
        Ok(NotebookServer { port, url })
    }

    /// `RebuildContainer` (spec.md §4.5 table): `full=true` forwards
    /// `incremental=false` to the host.
    pub async fn rebuild_container(&self, full: bool) -> Result<(), InvokerError> {
        self.ensure_open().await?;
        let mut client = self.client.clone();
        let request = self.authed_request(RebuildContainerRequest {
            incremental: !full,
        })?;
        let response = client.rebuild_container_async(request).await?.into_inner();

        if !response.rebuild_container {
            return Err(InvokerError::RemoteOperationFailed(
                "couldn't rebuild codespace".to_string(),
            ));
        }
        Ok(())
    }

    /// `StartSSHServer` (spec.md §4.5 table).
    pub async fn start_ssh_server(
        &self,
        options: StartSshServerOptions,
    ) -> Result<SshServer, InvokerError> {
        self.ensure_open().await?;

        let user_public_key = match options.user_public_key_file {
            Some(path) => read_trimmed(&path).await?,
            None => String::new(),
        };

        let mut client = self.client.clone();
        let request = self.authed_request(StartSshServerRequest { user_public_key })?;
        let response = client.start_ssh_server(request).await?.into_inner();

        if !response.result {
            return Err(InvokerError::RemoteOperationFailed(response.message));
        }

        let port: u16 =
            response
                .server_port
                .parse()
                .map_err(|source| InvokerError::ParseError {
                    raw: response.server_port.clone(),
                    source,
                })?;
        Ok(SshServer {
            port,
            user: response.user,
        })
    }

    async fn ensure_open(&self) -> Result<(), InvokerError> {
        if *self.closed.lock().await {
            return Err(InvokerError::ClosedConnection);
        }
        Ok(())
    }

    /// Implements spec.md §4.5's `Close`: `pf_cancel` before the listener
    /// (I6) — canceling it here stops the pump, which drops the listener
    /// it owns. Idempotent (calling twice is a no-op).
    pub async fn close(&self) -> Result<(), InvokerError> {
        let mut closed = self.closed.lock().await;
        if *closed {
            return Ok(());
        }

        self.pf_cancel.cancel();

        if let Some(task) = self.heartbeat_task.lock().await.take() {
            let _ = task.await;
        }
        if let Some(task) = self.pump_task.lock().await.take() {
            let _ = task.await;
        }

        *closed = true;
        Ok(())
    }
}

/// One heartbeat attempt: fetches the current keep-alive reason and sends
/// it, but races the whole thing against `cancel` so a cancellation that
/// arrives mid-RPC is observed immediately rather than after the call
/// resolves (I7: the heartbeat must never block shutdown).
async fn run_heartbeat_tick(
    client: &mut CodespaceHostServiceClient<Channel>,
    bearer_token: &str,
    client_id: &str,
    session: &Arc<dyn Session>,
    cancel: &CancellationToken,
) -> std::ops::ControlFlow<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => std::ops::ControlFlow::Break(()),
        result = async {
            let reason = session.get_keep_alive_reason().await;
            call_notify(client, bearer_token, client_id, &reason).await
        } => {
            if let Err(e) = result {
                debug!(error = %e, "heartbeat notification failed, ignoring");
            }
            std::ops::ControlFlow::Continue(())
        }
    }
}

async fn call_notify(
    client: &mut CodespaceHostServiceClient<Channel>,
    bearer_token: &str,
    client_id: &str,
    reason: &str,
) -> Result<(), InvokerError> {
    let mut request = tonic::Request::new(NotifyCodespaceOfClientActivityRequest {
        client_id: client_id.to_string(),
        client_activities: vec![reason.to_string()],
    });
    request.set_timeout(RPC_TIMEOUT);
    let value = format!("Bearer {bearer_token}")
        .parse()
        .map_err(|_| InvokerError::RemoteOperationFailed("invalid bearer token".into()))?;
    request.metadata_mut().insert("authorization", value);

    let response = client
        .notify_codespace_of_client_activity(request)
        .await?
        .into_inner();

    if !response.result {
        return Err(InvokerError::RemoteOperationFailed(response.message));
    }
    Ok(())
}

async fn read_trimmed(path: &Path) -> Result<String, InvokerError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| InvokerError::Io {
            step: "read ssh public key file",
            source,
        })?;
    Ok(contents.trim().to_string())
}
