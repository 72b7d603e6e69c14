//! Minimal CLI front-end over the codespace remote access core. Owns
//! argument parsing, config-file loading, and logging init only; every
//! interesting operation is delegated to `cs-connection`/
//! `cs-port-forwarder`/`cs-invoker`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cs_connection::CodespaceConnection;
use cs_invoker::{ConnectionSession, Invoker, StartSshServerOptions};
use cs_port_forwarder::{ForwardPortOptions, PortForwarder};
use cs_proto::{CodespaceDescriptor, PortVisibility};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cs-cli")]
#[command(about = "Connect to a codespace and drive its remote access core")]
#[command(version)]
struct Args {
    /// Codespace descriptor file (YAML or JSON; see spec.md §6).
    #[arg(long, short = 'd', env = "CS_DESCRIPTOR")]
    descriptor: PathBuf,

    /// Overrides the descriptor file's relay endpoint.
    #[arg(long, env = "CS_RELAY_ENDPOINT")]
    relay_endpoint: Option<String>,

    /// Overrides the descriptor file's session token.
    #[arg(long, env = "CS_SESSION_TOKEN")]
    session_token: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward a remote port to a local TCP listener.
    Forward {
        remote_port: u16,
        #[arg(long, default_value_t = 0)]
        local_port: u16,
        #[arg(long)]
        visibility: Option<String>,
        #[arg(long)]
        internal: bool,
    },
    /// Start the notebook server and print its URL.
    Notebook,
    /// Rebuild the codespace's container.
    Rebuild {
        #[arg(long)]
        full: bool,
    },
    /// Start the in-codespace SSH server.
    Ssh {
        #[arg(long)]
        user_public_key_file: Option<PathBuf>,
    },
}

fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

fn load_descriptor(path: &PathBuf) -> Result<CodespaceDescriptor> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read codespace descriptor: {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse codespace descriptor: {}", path.display()))
}

/// CLI/env flags override the descriptor file's connection fields, same
/// precedence rule the teacher's `build_agent_config` applies between its
/// config file and its own CLI flags.
fn apply_overrides(mut descriptor: CodespaceDescriptor, args: &Args) -> CodespaceDescriptor {
    if let Some(relay_endpoint) = &args.relay_endpoint {
        descriptor.connection.relay_endpoint = relay_endpoint.clone();
    }
    if let Some(session_token) = &args.session_token {
        descriptor.connection.session_token = session_token.clone();
    }
    descriptor
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let descriptor = load_descriptor(&args.descriptor)?;
    let descriptor = apply_overrides(descriptor, &args);
    if !descriptor.is_connection_ready() {
        anyhow::bail!("codespace is not connection-ready (state/session fields incomplete)");
    }

    let connection = CodespaceConnection::build(&descriptor, reqwest::Client::new())
        .context("failed to build codespace connection")?;
    let connection = Arc::new(connection);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    let result = run(connection.clone(), &cancel, args.command).await;

    if let Err(e) = connection.close().await {
        error!(error = %e, "failed to close codespace connection during shutdown");
    }

    result
}

async fn run(
    connection: Arc<CodespaceConnection>,
    cancel: &CancellationToken,
    command: Command,
) -> Result<()> {
    match command {
        Command::Forward {
            remote_port,
            local_port,
            visibility,
            internal,
        } => {
            let visibility = visibility
                .map(|v| v.parse::<PortVisibility>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;

            let listener = TcpListener::bind(("127.0.0.1", local_port))
                .await
                .context("failed to bind local listener")?;
            info!(
                local_addr = %listener.local_addr()?,
                remote_port,
                "forwarding port"
            );

            let forwarder = PortForwarder::new(connection);
            forwarder
                .forward_port(
                    cancel,
                    ForwardPortOptions {
                        remote_port,
                        listener: Some(listener),
                        keep_alive: true,
                        connect: true,
                        internal,
                        visibility,
                    },
                )
                .await
                .context("forward_port failed")?;
            Ok(())
        }
        Command::Notebook => {
            let invoker = create_invoker(connection, cancel).await?;
            let server = invoker
                .start_notebook_server()
                .await
                .context("start_notebook_server failed")?;
            println!("{}", server.url);
            invoker.close().await.context("failed to close invoker")?;
            Ok(())
        }
        Command::Rebuild { full } => {
            let invoker = create_invoker(connection, cancel).await?;
            invoker
                .rebuild_container(full)
                .await
                .context("rebuild_container failed")?;
            println!("rebuild requested");
            invoker.close().await.context("failed to close invoker")?;
            Ok(())
        }
        Command::Ssh {
            user_public_key_file,
        } => {
            let invoker = create_invoker(connection, cancel).await?;
            let server = invoker
                .start_ssh_server(StartSshServerOptions {
                    user_public_key_file,
                })
                .await
                .context("start_ssh_server failed")?;
            println!("{}@localhost:{}", server.user, server.port);
            invoker.close().await.context("failed to close invoker")?;
            Ok(())
        }
    }
}

async fn create_invoker(
    connection: Arc<CodespaceConnection>,
    cancel: &CancellationToken,
) -> Result<Invoker> {
    let session = Arc::new(ConnectionSession::new(connection));
    Invoker::create(cancel, session)
        .await
        .context("failed to create rpc invoker")
}
