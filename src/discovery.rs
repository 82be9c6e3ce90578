//! Passive network discovery over UDP.
//!
//! A running server answers the [`DISCOVERY_TOKEN`] datagram with its host
//! name. Nothing about the shares themselves is ever sent.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::DISCOVERY_TOKEN;

/// Largest datagram we read.
const MAX_DATAGRAM: usize = 2048;

/// Errors from the discovery client.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to open discovery socket: {0}")]
    Bind(std::io::Error),

    #[error("Failed to send discovery broadcast: {0}")]
    Send(std::io::Error),
}

/// Answers discovery broadcasts with this host's identity.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    identity: String,
}

impl DiscoveryResponder {
    pub async fn bind(addr: SocketAddr, identity: impl Into<String>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            identity: identity.into(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Answer requests until `shutdown` is cancelled or the socket fails.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.socket.local_addr() {
            debug!("Discovery responder listening on {}", addr);
        }
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, remote) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("Discovery receive error: {}", e);
                            break;
                        }
                    };

                    let data = String::from_utf8_lossy(&buf[..len]);
                    trace!("Discovery datagram from {}: {}", remote, data.trim());

                    if data.trim() == DISCOVERY_TOKEN {
                        if let Err(e) = self.socket.send_to(self.identity.as_bytes(), remote).await {
                            warn!("Failed to answer discovery request from {}: {}", remote, e);
                        }
                    }
                }

                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Discovery responder stopped");
    }
}

/// A server that answered a discovery broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub name: String,
    pub addr: SocketAddr,
}

/// Broadcast the discovery token to `target` every `interval` and collect
/// distinct replies until `window` has passed.
pub async fn discover(
    target: SocketAddr,
    window: Duration,
    interval: Duration,
) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(DiscoveryError::Bind)?;
    socket.set_broadcast(true).map_err(DiscoveryError::Bind)?;

    let deadline = Instant::now() + window;
    let mut next_send = Instant::now();
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    let mut buf = [0u8; MAX_DATAGRAM];

    while Instant::now() < deadline {
        if Instant::now() >= next_send {
            trace!("Sending discovery broadcast to {}", target);
            socket
                .send_to(DISCOVERY_TOKEN.as_bytes(), target)
                .await
                .map_err(DiscoveryError::Send)?;
            next_send += interval;
        }

        let wake = next_send.min(deadline);
        match tokio::time::timeout_at(wake, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                let name = String::from_utf8_lossy(&buf[..len]).trim().to_string();
                if seen.insert(addr) {
                    hosts.push(DiscoveredHost { name, addr });
                }
            }
            Ok(Err(e)) => warn!("Error receiving discovery reply: {}", e),
            Err(_) => {}
        }
    }

    Ok(hosts)
}

/// Name this host answers discovery requests with.
pub fn host_identity() -> String {
    let from_command = Command::new("hostname")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    from_command
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
