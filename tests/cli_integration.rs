//! Integration tests for the `quickshare` binary.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Get path to the quickshare binary.
fn quickshare_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_quickshare"))
}

fn run(socket: &Path, args: &[&str]) -> Output {
    Command::new(quickshare_bin())
        .arg("--socket")
        .arg(socket)
        .args(args)
        .output()
        .expect("Failed to execute quickshare")
}

/// Start a server process on ephemeral ports and wait for its socket.
fn spawn_server(socket: &Path, files: &[&str]) -> Child {
    let child = Command::new(quickshare_bin())
        .arg("--socket")
        .arg(socket)
        .args(["--port", "0", "--discovery-port", "0", "-q"])
        .args(files)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn quickshare server");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !socket.exists() {
        assert!(Instant::now() < deadline, "server socket never appeared");
        thread::sleep(Duration::from_millis(50));
    }
    child
}

fn wait_for_exit(child: &mut Child) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status.success();
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("server did not exit");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_help() {
    let output = Command::new(quickshare_bin())
        .arg("--help")
        .output()
        .expect("Failed to execute quickshare --help");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("--ls"));
    assert!(stdout.contains("--stop"));
    assert!(stdout.contains("--discover"));
}

#[test]
fn test_management_without_server_fails() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("none.sock");

    let output = run(&socket, &["--ls"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Expected failure exit code");
    assert!(stderr.contains("No quickshare server is running"));
    assert!(!socket.exists());
}

#[test]
fn test_second_invocation_manages_running_server() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("quickshare.sock");
    let first = temp_dir.path().join("first.txt");
    let second = temp_dir.path().join("second.txt");
    std::fs::write(&first, b"1").unwrap();
    std::fs::write(&second, b"2").unwrap();

    let first_arg = format!("one:{}", first.display());
    let mut server = spawn_server(&socket, &[&first_arg]);

    // Add a share through a second invocation.
    let second_arg = second.display().to_string();
    let output = run(&socket, &[&second_arg]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "add failed: {}", stdout);
    assert!(stdout.contains(&format!("Serving: second.txt ({})", second.display())));

    // Adding the same name again is reported, not fatal to the server.
    let output = run(&socket, &[&second_arg]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("Share exists already"));

    let output = run(&socket, &["--ls"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains(&format!("  - one {}", first.display())));
    assert!(stdout.contains(&format!("  - second.txt {}", second.display())));
    assert!(stdout.find("one").unwrap() < stdout.find("second.txt").unwrap());

    let output = run(&socket, &["--rm", "one", "--ls"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Removed: one"));

    let output = run(&socket, &["--stop"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Server stopped"));

    assert!(wait_for_exit(&mut server), "server exited with failure");
    assert!(!socket.exists());
}
