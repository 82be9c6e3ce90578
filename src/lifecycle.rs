//! Process lifecycle: server-or-client decision, server startup and
//! shutdown, and the client side of an invocation.
//!
//! The control socket's path is the only signal of a running server. If a
//! server answers there, this process becomes its client; otherwise it
//! becomes the server. Two processes started at the same instant can both
//! see no server; the loser then fails to claim the socket and exits with
//! an error.

use anyhow::Context;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::control::{ClientError, ControlClient, ControlHandle, ControlServer};
use crate::discovery::{host_identity, DiscoveryResponder};
use crate::registry::{Registry, ShareSpec};
use crate::server::{start_server, HttpHandle};

/// How long in-flight downloads may continue after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub socket_path: PathBuf,
    pub http_addr: SocketAddr,
    /// `None` disables the discovery responder.
    pub discovery_addr: Option<SocketAddr>,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path(),
            http_addr: config.http_addr(),
            discovery_addr: Some(config.discovery_addr()),
        }
    }
}

/// What this invocation turned out to be.
pub enum Mode {
    /// No server is running; this process should become it.
    Server,
    /// A server answered on the control socket.
    Client(ControlClient),
}

/// Decide between server and client mode.
///
/// A socket file that refuses connections is left over from a crashed
/// server and counts as "no server"; [`ControlServer`] replaces it.
pub async fn probe(socket_path: &Path) -> Result<Mode, ClientError> {
    if !socket_path.exists() {
        return Ok(Mode::Server);
    }

    match ControlClient::connect_to(socket_path).await {
        Ok(client) => {
            debug!("Connected to server '{}'", socket_path.display());
            Ok(Mode::Client(client))
        }
        Err(ClientError::ServerNotRunning) => {
            warn!(
                "Control socket {} is stale, starting a new server",
                socket_path.display()
            );
            Ok(Mode::Server)
        }
        Err(e) => Err(e),
    }
}

/// A server with all its listeners running.
pub struct RunningServer {
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    control: ControlHandle,
    http: HttpHandle,
    discovery: Option<(SocketAddr, JoinHandle<()>)>,
}

impl RunningServer {
    /// Claim the control socket, then start the HTTP listener and the
    /// discovery responder.
    ///
    /// Failing to bind the control socket or the HTTP port is fatal. A
    /// discovery port that cannot be bound only disables discovery.
    pub async fn start(options: &ServerOptions, registry: Arc<Registry>) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();

        let control = ControlServer::new(
            options.socket_path.clone(),
            Arc::clone(&registry),
            shutdown.clone(),
        )
        .run()
        .await
        .with_context(|| {
            format!(
                "Failed to create control socket {}",
                options.socket_path.display()
            )
        })?;

        let started =
            start_server(options.http_addr, Arc::clone(&registry), shutdown.clone()).await;
        let http = match started {
            Ok(http) => http,
            Err(e) => {
                // Release the control socket before giving up.
                control.shutdown();
                control.wait().await;
                return Err(e);
            }
        };

        let discovery = match options.discovery_addr {
            Some(addr) => start_discovery(addr, shutdown.clone()).await,
            None => None,
        };

        Ok(Self {
            registry,
            shutdown,
            control,
            http,
            discovery,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http.local_addr()
    }

    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery.as_ref().map(|(addr, _)| *addr)
    }

    /// Token that stops the whole server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask every listener to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for shutdown to be requested, then for every listener to stop.
    /// The control socket file is gone when this returns.
    pub async fn wait(self) {
        self.shutdown.cancelled().await;
        info!("Stopping server");

        self.control.wait().await;
        self.http.wait(SHUTDOWN_GRACE).await;
        if let Some((_, task)) = self.discovery {
            if let Err(e) = task.await {
                error!("Discovery task failed: {}", e);
            }
        }

        info!("Server stopped");
    }
}

async fn start_discovery(
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Option<(SocketAddr, JoinHandle<()>)> {
    let responder = match DiscoveryResponder::bind(addr, host_identity()).await {
        Ok(responder) => responder,
        Err(e) => {
            warn!("Discovery disabled, cannot bind {}: {}", addr, e);
            return None;
        }
    };
    let local_addr = responder.local_addr().unwrap_or(addr);
    debug!("Discovery responder on {}", local_addr);
    Some((local_addr, tokio::spawn(responder.run(shutdown))))
}

/// Run the server until a `stop` command or a termination signal.
///
/// `shares` are registered before any listener starts.
pub async fn run_server(options: &ServerOptions, shares: &[String]) -> anyhow::Result<()> {
    let registry = Arc::new(Registry::new());
    for arg in shares {
        match ShareSpec::parse(arg).and_then(|spec| registry.add_spec(&spec)) {
            Ok(share) => println!("Serving: {} ({})", share.name, share.path.display()),
            Err(e) => eprintln!("Error adding share '{}': {}", arg, e),
        }
    }

    let server = RunningServer::start(options, registry).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Received termination signal");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    });

    server.wait().await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// What a client invocation asks of the running server, executed in field
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientActions {
    pub list: bool,
    pub remove: Vec<String>,
    pub add: Vec<String>,
    pub stop: bool,
}

impl ClientActions {
    pub fn is_empty(&self) -> bool {
        !self.list && !self.stop && self.remove.is_empty() && self.add.is_empty()
    }

    /// Whether anything besides adding shares was requested.
    pub fn has_management(&self) -> bool {
        self.list || self.stop || !self.remove.is_empty()
    }
}

/// Execute `actions` against a running server, writing a report to `out`.
///
/// Per-share failures are reported and skipped. Returns how many actions
/// failed; a broken connection is returned as an error.
pub async fn run_client<W: Write>(
    mut client: ControlClient,
    actions: &ClientActions,
    out: &mut W,
) -> anyhow::Result<usize> {
    let mut failures = 0;

    if actions.list {
        let shares = client.list().await.context("Failed to list shares")?;
        if shares.is_empty() {
            writeln!(out, "No shares")?;
        }
        for share in shares {
            writeln!(out, "  - {} {}", share.name, share.path.display())?;
        }
    }

    for name in &actions.remove {
        match client.remove(name).await {
            Ok(()) => writeln!(out, "Removed: {}", name)?,
            Err(ClientError::Server(message)) => {
                failures += 1;
                writeln!(out, "Error removing share '{}': {}", name, message)?;
            }
            Err(e) => return Err(e).context("Failed to remove share"),
        }
    }

    for arg in &actions.add {
        let spec = match ShareSpec::parse(arg) {
            Ok(spec) => spec,
            Err(e) => {
                failures += 1;
                writeln!(out, "Error adding share '{}': {}", arg, e)?;
                continue;
            }
        };
        match client.add(&spec).await {
            Ok(share) => writeln!(out, "Serving: {} ({})", share.name, share.path.display())?,
            Err(ClientError::Server(message)) => {
                failures += 1;
                writeln!(out, "Error adding share '{}': {}", arg, message)?;
            }
            Err(ClientError::InvalidSpec(e)) => {
                failures += 1;
                writeln!(out, "Error adding share '{}': {}", arg, e)?;
            }
            Err(e) => return Err(e).context("Failed to add share"),
        }
    }

    if actions.stop {
        client.stop().await.context("Failed to stop server")?;
        writeln!(out, "Server stopped")?;
    }

    Ok(failures)
}
