//! Client for the control socket.
//!
//! Later invocations of the command use this to manage the registry of an
//! already running server.

use crate::control::protocol::Command;
use crate::registry::{RegistryError, Share, ShareSpec};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tracing::debug;

/// Default timeout for control operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when talking to the server
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to server: {0}")]
    ConnectionFailed(std::io::Error),

    #[error("No quickshare server is running")]
    ServerNotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("{0}")]
    Server(String),

    #[error("{0}")]
    InvalidSpec(#[from] RegistryError),

    #[error("Unexpected response from server: {0}")]
    UnexpectedResponse(String),

    #[error("Connection closed by server")]
    ConnectionClosed,
}

/// One line of a listing as printed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedShare {
    pub name: String,
    pub path: PathBuf,
}

/// Client side of one control session.
pub struct ControlClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: BufWriter<tokio::net::unix::OwnedWriteHalf>,
    socket_path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    /// Connect to a running server.
    pub async fn connect_to(socket_path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let socket_path = socket_path.into();
        debug!("Connecting to server '{}'", socket_path.display());

        if !socket_path.exists() {
            return Err(ClientError::ServerNotRunning);
        }

        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    ClientError::ServerNotRunning
                }
                _ => ClientError::ConnectionFailed(e),
            })?;

        Ok(Self::from_stream(stream, socket_path))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream, socket_path: PathBuf) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a different timeout for each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let line = command.to_line();
        debug!("Sending: {}", line.trim_end());
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout)??;
        if read == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(line.trim().to_string())
    }

    /// Send a command and read its single-line reply, turning `ERR` into
    /// [`ClientError::Server`].
    async fn request(&mut self, command: Command) -> Result<String, ClientError> {
        self.send(&command).await?;
        let line = self.read_line().await?;
        match line.strip_prefix("ERR") {
            Some(message) => Err(ClientError::Server(message.trim().to_string())),
            None => Ok(line),
        }
    }

    /// Check that the server answers.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        match self.request(Command::Ping).await?.as_str() {
            "pong" => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other.to_string())),
        }
    }

    /// Register a share. The spec's path is made absolute here, against
    /// this process's working directory, before it is sent.
    pub async fn add(&mut self, spec: &ShareSpec) -> Result<Share, ClientError> {
        let spec = spec.clone().resolve()?;

        let line = self.request(Command::Add(spec.to_arg())).await?;
        if line.starts_with("OK") {
            Ok(Share {
                name: spec.name,
                path: spec.path,
                timeout: None,
            })
        } else {
            Err(ClientError::UnexpectedResponse(line))
        }
    }

    /// Remove a share by name.
    pub async fn remove(&mut self, name: &str) -> Result<(), ClientError> {
        match self.request(Command::Remove(name.to_string())).await?.as_str() {
            "OK" => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other.to_string())),
        }
    }

    /// Fetch the server's share listing in registry order.
    pub async fn list(&mut self) -> Result<Vec<ListedShare>, ClientError> {
        self.send(&Command::List).await?;

        let mut shares = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(shares);
            }
            let (name, path) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            shares.push(ListedShare {
                name: name.to_string(),
                path: PathBuf::from(path),
            });
        }
    }

    /// Ask the server to shut down. Consumes the client since the server
    /// closes the connection afterwards.
    pub async fn stop(mut self) -> Result<(), ClientError> {
        match self.request(Command::Stop).await?.as_str() {
            "OK" => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other.to_string())),
        }
    }
}
