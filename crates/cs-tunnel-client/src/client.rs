use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{read_message, write_message};
use crate::dialer::{DuplexStream, StreamDialer};
use crate::error::ClientError;
use crate::message::SessionMessage;
use crate::router::{ChannelEvent, ChannelRouter};

/// How long `connect` waits for the host's handshake acknowledgement.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long `refresh_ports` waits for an acknowledgement.
const REFRESH_PORTS_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedWriter = WriteHalf<Box<dyn DuplexStream>>;
type BoxedReader = ReadHalf<Box<dyn DuplexStream>>;

/// Immutable configuration used to build a not-yet-connected [`Client`]
/// (spec.md §4.3 step 3: "Pre-build a Tunnel Client not yet connected").
pub struct Connector {
    dialer: Arc<dyn StreamDialer>,
    session_id: String,
    session_token: String,
}

impl Connector {
    pub fn new(dialer: Arc<dyn StreamDialer>, session_id: String, session_token: String) -> Self {
        Self {
            dialer,
            session_id,
            session_token,
        }
    }

    pub fn build(self) -> Client {
        Client {
            dialer: self.dialer,
            session_id: self.session_id,
            session_token: self.session_token,
            state: AsyncMutex::new(None),
        }
    }
}

struct Session {
    writer: Arc<AsyncMutex<BoxedWriter>>,
    router: Arc<ChannelRouter>,
    reader_task: JoinHandle<()>,
}

/// Owns the long-lived duplex stream to the relay: SSH-style session
/// muxing over a single connection (spec.md §4.2).
///
/// `connect`/`close` are plain `&self` methods — per spec.md §4.2 this
/// crate does *not* serialize them against each other; the composition
/// root (`cs-connection`) is responsible for that under its own mutex.
/// The `AsyncMutex` here exists purely for interior mutability of the
/// session handle, not for call ordering.
pub struct Client {
    dialer: Arc<dyn StreamDialer>,
    session_id: String,
    session_token: String,
    state: AsyncMutex<Option<Session>>,
}

impl Client {
    /// Establishes the stream and performs the SSH-style handshake.
    /// Calling this when already connected is a no-op (I1).
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            debug!("connect: already connected, no-op");
            return Ok(());
        }

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Canceled),
            stream = self.dialer.dial(cancel) => stream?,
        };

        let (read_half, write_half) = split(stream);
        let writer = Arc::new(AsyncMutex::new(write_half));
        let router = Arc::new(ChannelRouter::new());

        let (ack_tx, ack_rx) = oneshot::channel();
        let reader_task = spawn_reader(read_half, router.clone(), Some(ack_tx));

        {
            let mut w = writer.lock().await;
            write_message(
                &mut *w,
                &SessionMessage::Connect {
                    session_id: self.session_id.clone(),
                    session_token: self.session_token.clone(),
                },
            )
            .await?;
        }

        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, ack_rx);
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                reader_task.abort();
                return Err(ClientError::Canceled);
            }
            result = handshake => match result {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(_)) => {
                    reader_task.abort();
                    return Err(ClientError::ControlChannelClosed("handshake"));
                }
                Err(_) => {
                    reader_task.abort();
                    return Err(ClientError::Timeout("handshake"));
                }
            },
        };

        match accepted {
            Ok(()) => {
                info!("tunnel client connected");
                *state = Some(Session {
                    writer,
                    router,
                    reader_task,
                });
                Ok(())
            }
            Err(reason) => {
                reader_task.abort();
                Err(ClientError::HandshakeRejected(reason))
            }
        }
    }

    /// Informs the remote host that the local port topology changed.
    pub async fn refresh_ports(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let state = self.state.lock().await;
        let session = state.as_ref().ok_or(ClientError::ClosedConnection)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        session.router.register_refresh_waiter(ack_tx);

        {
            let mut w = session.writer.lock().await;
            write_message(&mut *w, &SessionMessage::RefreshPorts).await?;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Canceled),
            result = tokio::time::timeout(REFRESH_PORTS_TIMEOUT, ack_rx) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(ClientError::ControlChannelClosed("refresh ports")),
                Err(_) => Err(ClientError::Timeout("refresh ports")),
            },
        }
    }

    /// Blocks until the host has published `remote_port`.
    pub async fn wait_for_forwarded_port(
        &self,
        cancel: &CancellationToken,
        remote_port: u16,
    ) -> Result<(), ClientError> {
        let (writer, router) = {
            let state = self.state.lock().await;
            let session = state.as_ref().ok_or(ClientError::ClosedConnection)?;
            (session.writer.clone(), session.router.clone())
        };

        if router.is_port_forwarded(remote_port) {
            return Ok(());
        }

        {
            let mut w = writer.lock().await;
            write_message(&mut *w, &SessionMessage::QueryForwardedPort { remote_port }).await?;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Canceled),
            _ = router.wait_port_forwarded(remote_port) => Ok(()),
        }
    }

    /// Accepts connections on `listener` and pumps each bidirectionally
    /// against a fresh multiplexed channel to `remote_port`, until `cancel`
    /// fires or the listener errors.
    pub async fn connect_to_forwarded_port(
        &self,
        cancel: &CancellationToken,
        listener: TcpListener,
        remote_port: u16,
    ) -> Result<(), ClientError> {
        let (writer, router) = {
            let state = self.state.lock().await;
            let session = state.as_ref().ok_or(ClientError::ClosedConnection)?;
            (session.writer.clone(), session.router.clone())
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (local_stream, peer_addr) = accepted.map_err(ClientError::Io)?;
                    debug!(%peer_addr, remote_port, "accepted local connection for forwarded port");

                    let writer = writer.clone();
                    let router = router.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            pump_connection(writer, router, remote_port, local_stream, cancel).await
                        {
                            warn!(error = %e, remote_port, "forwarded port pump ended with error");
                        }
                    });
                }
            }
        }
    }

    /// Tears down the stream. Idempotent (I3): closing an already-closed
    /// or never-connected client returns `Ok(())`.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.take() {
            session.reader_task.abort();
            let mut w = session.writer.lock().await;
            let _ = w.shutdown().await;
            info!("tunnel client closed");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        // Best-effort, non-blocking snapshot; callers needing a hard
        // guarantee should rely on the result of `connect`/`close` instead.
        self.state.try_lock().map(|s| s.is_some()).unwrap_or(true)
    }
}

async fn pump_connection(
    writer: Arc<AsyncMutex<BoxedWriter>>,
    router: Arc<ChannelRouter>,
    remote_port: u16,
    mut local_stream: tokio::net::TcpStream,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    let channel_id = router.allocate_channel_id();
    let open_rx = router.register_open_waiter(channel_id);
    let mut events = router.register_channel(channel_id);

    {
        let mut w = writer.lock().await;
        write_message(&mut *w, &SessionMessage::ChannelOpen { channel_id, remote_port }).await?;
    }

    match open_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => {
            router.deregister_channel(channel_id);
            return Err(ClientError::HandshakeRejected(reason));
        }
        Err(_) => {
            router.deregister_channel(channel_id);
            return Err(ClientError::ControlChannelClosed("channel open"));
        }
    }

    let (mut local_read, mut local_write) = local_stream.split();
    let mut buf = vec![0u8; 16 * 1024];

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            n = local_read.read(&mut buf) => {
                match n {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        let mut w = writer.lock().await;
                        if let Err(e) = write_message(
                            &mut *w,
                            &SessionMessage::ChannelData { channel_id, data: buf[..n].to_vec() },
                        ).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(ClientError::Io(e)),
                }
            }
            event = events.recv() => {
                match event {
                    Some(ChannelEvent::Data(data)) => {
                        if let Err(e) = local_write.write_all(&data).await {
                            break Err(ClientError::Io(e));
                        }
                    }
                    Some(ChannelEvent::Closed) | None => break Ok(()),
                }
            }
        }
    };

    {
        let mut w = writer.lock().await;
        let _ = write_message(&mut *w, &SessionMessage::ChannelClose { channel_id }).await;
    }
    router.deregister_channel(channel_id);
    result
}

fn spawn_reader(
    mut reader: BoxedReader,
    router: Arc<ChannelRouter>,
    mut handshake_ack: Option<oneshot::Sender<Result<(), String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(SessionMessage::ConnectAck { accepted, reason })) => {
                    if let Some(tx) = handshake_ack.take() {
                        let _ = tx.send(if accepted {
                            Ok(())
                        } else {
                            Err(reason.unwrap_or_default())
                        });
                    }
                }
                Ok(Some(SessionMessage::RefreshPortsAck)) => {
                    router.complete_refresh();
                }
                Ok(Some(SessionMessage::PortForwarded { remote_port })) => {
                    router.mark_port_forwarded(remote_port);
                }
                Ok(Some(SessionMessage::ChannelOpenConfirmation { channel_id })) => {
                    router.complete_open(channel_id, Ok(()));
                }
                Ok(Some(SessionMessage::ChannelOpenFailure { channel_id, reason })) => {
                    router.complete_open(channel_id, Err(reason));
                }
                Ok(Some(SessionMessage::ChannelData { channel_id, data })) => {
                    router.dispatch_data(channel_id, data);
                }
                Ok(Some(SessionMessage::ChannelClose { channel_id })) => {
                    router.dispatch_close(channel_id);
                }
                Ok(Some(other)) => {
                    debug!(?other, "tunnel client: ignoring unexpected message from host");
                }
                Ok(None) => {
                    debug!("tunnel client: control stream closed by host");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "tunnel client: error reading from control stream");
                    break;
                }
            }
        }
    })
}
