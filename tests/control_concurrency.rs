//! Concurrent control sessions against one registry.
//!
//! Several clients interleave add/rm/ls on overlapping names. Whatever the
//! interleaving, the outcome must match some serial order: no duplicate
//! names, no lost updates, and every listing well formed.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quickshare::control::{ControlClient, ControlServer};
use quickshare::registry::{Registry, ShareSpec};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

const CLIENTS: usize = 10;
const COMMANDS_PER_CLIENT: usize = 10;
const NAMES: usize = 5;

/// Outcome of one command as seen by a client.
#[derive(Debug)]
enum Outcome {
    Added(String),
    AddRejected,
    Removed(String),
    RemoveMissed,
    Listed(Vec<String>),
}

async fn run_session(socket_path: PathBuf, client: usize) -> Vec<Outcome> {
    let stream = UnixStream::connect(&socket_path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut outcomes = Vec::new();

    for i in 0..COMMANDS_PER_CLIENT {
        let name = format!("share{}", (client + i) % NAMES);
        let line = match (client + i) % 3 {
            0 => format!("add {}:/tmp/{}-{}\n", name, client, i),
            1 => format!("rm {}\n", name),
            _ => "ls\n".to_string(),
        };
        write_half.write_all(line.as_bytes()).await.unwrap();

        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        let response = response.trim_end().to_string();

        let outcome = if line.starts_with("add") {
            if response.starts_with("OK Share") {
                Outcome::Added(name)
            } else {
                assert_eq!(response, "ERR Share exists already");
                Outcome::AddRejected
            }
        } else if line.starts_with("rm") {
            if response == "OK" {
                Outcome::Removed(name)
            } else {
                assert_eq!(response, "ERR Share not found");
                Outcome::RemoveMissed
            }
        } else {
            let mut names = Vec::new();
            let mut current = response;
            while current != "OK" {
                let (listed, path) = current.split_once(' ').expect("torn listing line");
                assert!(path.starts_with("/tmp/"), "bad path in listing: {}", path);
                names.push(listed.to_string());

                let mut next = String::new();
                reader.read_line(&mut next).await.unwrap();
                current = next.trim_end().to_string();
            }
            Outcome::Listed(names)
        };
        outcomes.push(outcome);
    }

    outcomes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_commands_serialize() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let registry = Arc::new(Registry::new());

    let handle = ControlServer::new(
        socket_path.clone(),
        Arc::clone(&registry),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    let sessions: Vec<_> = (0..CLIENTS)
        .map(|client| tokio::spawn(run_session(socket_path.clone(), client)))
        .collect();

    let mut outcomes = Vec::new();
    for session in sessions {
        outcomes.extend(session.await.unwrap());
    }
    assert_eq!(outcomes.len(), CLIENTS * COMMANDS_PER_CLIENT);

    // Net successful adds minus removes per name must be 0 or 1 and must
    // match the final registry.
    let mut net: HashMap<String, i64> = HashMap::new();
    for outcome in &outcomes {
        match outcome {
            Outcome::Added(name) => *net.entry(name.clone()).or_default() += 1,
            Outcome::Removed(name) => *net.entry(name.clone()).or_default() -= 1,
            Outcome::Listed(names) => {
                let unique: HashSet<_> = names.iter().collect();
                assert_eq!(unique.len(), names.len(), "duplicate in listing");
                assert!(names.len() <= NAMES);
            }
            Outcome::AddRejected | Outcome::RemoveMissed => {}
        }
    }

    let final_names: HashSet<String> = registry.list().into_iter().map(|s| s.name).collect();
    for i in 0..NAMES {
        let name = format!("share{}", i);
        let count = net.get(&name).copied().unwrap_or(0);
        assert!(count == 0 || count == 1, "{} has net count {}", name, count);
        assert_eq!(final_names.contains(&name), count == 1, "lost update on {}", name);
    }

    // A fresh listing agrees with the registry.
    let mut client = ControlClient::connect_to(socket_path.clone()).await.unwrap();
    let listed: Vec<String> = client
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    let expected: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(listed, expected);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap();
    assert!(!socket_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_name_race_has_one_winner() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let registry = Arc::new(Registry::new());

    let handle = ControlServer::new(
        socket_path.clone(),
        Arc::clone(&registry),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    let attempts: Vec<_> = (0..20)
        .map(|i| {
            let socket_path = socket_path.clone();
            tokio::spawn(async move {
                let mut client = ControlClient::connect_to(socket_path).await.unwrap();
                let spec = ShareSpec::parse(&format!("contested:/tmp/{}", i)).unwrap();
                client.add(&spec).await.is_ok()
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(registry.len(), 1);

    handle.shutdown();
}
