//! Control socket listener.
//!
//! Accepts any number of local connections and runs each one on its own
//! task. Every connection shares the same [`Registry`]. A `stop` command on
//! any connection cancels the server-wide shutdown token.

use crate::control::protocol::{Command, Response};
use crate::registry::{Registry, RegistryError, ShareSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur in the control server
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A server is already listening on {0}")]
    SocketExists(PathBuf),
}

/// How a control session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    /// Peer disconnected or the server is shutting down.
    Closed,
    /// Peer asked the whole server to stop.
    Stop,
}

/// Listener for the control socket.
pub struct ControlServer {
    registry: Arc<Registry>,
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

/// Handle to a running control listener.
pub struct ControlHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ControlHandle {
    /// Cancel the shared shutdown token.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the accept loop has exited and the socket file is gone.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!("Control listener task failed: {}", e);
        }
    }
}

impl ControlServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        registry: Arc<Registry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            socket_path: socket_path.into(),
            shutdown,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and start accepting connections.
    ///
    /// A leftover socket file that nobody listens on is removed first. The
    /// socket file is removed again once the shutdown token is cancelled.
    pub async fn run(self) -> Result<ControlHandle, ControlError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(ControlError::SocketExists(self.socket_path.clone()));
            }
            warn!("Removing stale control socket {:?}", self.socket_path);
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Control socket: {}", self.socket_path.display());

        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(accept_loop(
            listener,
            self.registry,
            self.socket_path,
            self.shutdown,
        ));

        Ok(ControlHandle { shutdown, task })
    }
}

async fn accept_loop(
    listener: UnixListener,
    registry: Arc<Registry>,
    socket_path: PathBuf,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        debug!("Accepted control connection");
                        let registry = Arc::clone(&registry);
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            match handle_connection(stream, &registry, &shutdown).await {
                                Ok(Session::Stop) => {
                                    info!("Shutting down server");
                                    shutdown.cancel();
                                }
                                Ok(Session::Closed) => {}
                                Err(e) => debug!("Control connection error: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept control connection: {}", e);
                    }
                }
            }

            _ = shutdown.cancelled() => {
                debug!("Control listener stopping");
                break;
            }
        }
    }

    drop(listener);
    if let Err(e) = std::fs::remove_file(&socket_path) {
        warn!("Failed to remove control socket: {}", e);
    }
}

/// Serve one client until it disconnects, stops the server, or the server
/// shuts down underneath it.
async fn handle_connection(
    stream: UnixStream,
    registry: &Registry,
    shutdown: &CancellationToken,
) -> Result<Session, ControlError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();

        tokio::select! {
            read_result = reader.read_until(b'\n', &mut buf) => {
                if read_result? == 0 {
                    debug!("Control client disconnected");
                    return Ok(Session::Closed);
                }

                let line = String::from_utf8_lossy(&buf);
                trace!("READ {}", line.trim());

                let (response, session) = match Command::parse(&line) {
                    Ok(None) => continue,
                    Ok(Some(Command::Stop)) => (Response::Ok, Session::Stop),
                    Ok(Some(command)) => (dispatch(command, registry), Session::Closed),
                    Err(e) => {
                        debug!("Rejected control line {:?}: {:?}", line.trim(), e);
                        (Response::error(e.to_string()), Session::Closed)
                    }
                };

                writer.write_all(response.encode().as_bytes()).await?;
                writer.flush().await?;

                if session == Session::Stop {
                    return Ok(Session::Stop);
                }
            }

            _ = shutdown.cancelled() => {
                return Ok(Session::Closed);
            }
        }
    }
}

/// Apply one command to the registry.
pub fn dispatch(command: Command, registry: &Registry) -> Response {
    match command {
        Command::Ping => Response::Pong,
        Command::Stop => Response::Ok,
        Command::List => Response::Listing(registry.list()),

        Command::Add(arg) => {
            let added = ShareSpec::parse(&arg).and_then(|spec| registry.add_spec(&spec));
            match added {
                Ok(share) => {
                    info!("Added share \"{}\"@'{}'", share.name, share.path.display());
                    Response::Added(share)
                }
                Err(RegistryError::AlreadyExists) => Response::error("Share exists already"),
                Err(RegistryError::InvalidSpec(reason)) => {
                    debug!("Invalid share specification: {}", reason);
                    Response::error("Invalid share specification")
                }
                Err(RegistryError::Io(e)) => {
                    warn!("Failed to resolve share path '{}': {}", arg, e);
                    Response::error("Invalid share specification")
                }
            }
        }

        Command::Remove(name) => {
            if registry.remove(&name) {
                info!("Removed share \"{}\"", name);
                Response::Ok
            } else {
                Response::error("Share not found")
            }
        }
    }
}
