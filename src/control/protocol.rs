//! Text protocol spoken over the control socket.
//!
//! One command per line, case-sensitive, surrounding whitespace ignored.
//! Every response is one or more newline-terminated lines.

use crate::registry::Share;
use thiserror::Error;

/// Errors from parsing a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown command")]
    UnknownCommand(String),

    #[error("missing argument")]
    MissingArgument(&'static str),
}

/// Commands a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check.
    Ping,
    /// Register a `[name:]path` spec.
    Add(String),
    /// Remove a share by name.
    Remove(String),
    /// List all shares.
    List,
    /// Shut the whole server down.
    Stop,
}

impl Command {
    /// Parse one line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };

        let command = match verb {
            "ping" => Command::Ping,
            "ls" | "list" => Command::List,
            "stop" => Command::Stop,
            "add" if arg.is_empty() => return Err(ProtocolError::MissingArgument("add")),
            "add" => Command::Add(arg.to_string()),
            "rm" if arg.is_empty() => return Err(ProtocolError::MissingArgument("rm")),
            "rm" => Command::Remove(arg.to_string()),
            _ => return Err(ProtocolError::UnknownCommand(verb.to_string())),
        };

        Ok(Some(command))
    }

    /// Encode as a request line, including the trailing newline.
    pub fn to_line(&self) -> String {
        match self {
            Command::Ping => "ping\n".to_string(),
            Command::Add(spec) => format!("add {}\n", spec),
            Command::Remove(name) => format!("rm {}\n", name),
            Command::List => "ls\n".to_string(),
            Command::Stop => "stop\n".to_string(),
        }
    }
}

/// Responses the server sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Pong,
    Ok,
    Added(Share),
    Listing(Vec<Share>),
    Error(String),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    /// Encode the full response, every line newline-terminated.
    pub fn encode(&self) -> String {
        match self {
            Response::Pong => "pong\n".to_string(),
            Response::Ok => "OK\n".to_string(),
            Response::Added(share) => {
                format!("OK Share \"{}\"@'{}'\n", share.name, share.path.display())
            }
            Response::Listing(shares) => {
                let mut out = String::new();
                for share in shares {
                    out.push_str(&share.to_string());
                    out.push('\n');
                }
                out.push_str("OK\n");
                out
            }
            Response::Error(message) => format!("ERR {}\n", message),
        }
    }
}
