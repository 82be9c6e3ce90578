//! Local control channel.
//!
//! The running server listens on a Unix socket; later invocations connect
//! to it and manage the share registry with a line-based text protocol.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ClientError, ControlClient, ListedShare};
pub use protocol::{Command, ProtocolError, Response};
pub use server::{ControlError, ControlHandle, ControlServer};
