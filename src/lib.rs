//! Quickshare: serve local files over HTTP and manage the running
//! instance from later invocations of the same command.
//!
//! The first invocation becomes the server. It owns the share
//! [`registry::Registry`], serves it over HTTP, answers discovery
//! broadcasts and listens on a Unix control socket. Later invocations find
//! the socket and act as clients of the [`control`] protocol.

pub mod config;
pub mod control;
pub mod discovery;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod server;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8249;

/// Default UDP port for discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8249;

/// Default location of the control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/tmp/quickshare";

/// Token a discovery client broadcasts.
pub const DISCOVERY_TOKEN: &str = "DISCOVER";
