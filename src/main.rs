use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use quickshare::config::Config;
use quickshare::discovery::discover;
use quickshare::lifecycle::{probe, run_client, run_server, ClientActions, Mode, ServerOptions};
use quickshare::logging::{init_logging, LogConfig, Verbosity};

#[derive(Parser)]
#[command(name = "quickshare")]
#[command(version)]
#[command(about = "Quick file share server")]
#[command(
    long_about = "Serve files over HTTP. The first invocation starts the server; later invocations add their FILES to it, or manage it with --ls, --rm and --stop."
)]
struct Cli {
    /// Files to share, as PATH or NAME:PATH
    files: Vec<String>,

    /// Verbose output (-vv increases verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<String>,

    /// List all current shares
    #[arg(long)]
    ls: bool,

    /// Remove a share by name (repeatable)
    #[arg(long = "rm", value_name = "NAME")]
    remove: Vec<String>,

    /// Stop the server
    #[arg(long)]
    stop: bool,

    /// Search the network for shares
    #[arg(long)]
    discover: bool,

    /// Seconds to wait for discovery replies
    #[arg(long, default_value = "3", value_name = "SECS")]
    discover_timeout: u64,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// UDP port for discovery
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Path of the control socket
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if cli.port.is_some() {
        config.port = cli.port;
    }
    if cli.discovery_port.is_some() {
        config.discovery_port = cli.discovery_port;
    }
    if cli.socket.is_some() {
        config.socket_path = cli.socket.clone();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }

    let _log_guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_flags(cli.quiet, cli.verbose),
        log_file: config.log_file.clone(),
    });

    if cli.discover {
        return run_discover(&config, Duration::from_secs(cli.discover_timeout)).await;
    }

    let actions = ClientActions {
        list: cli.ls,
        remove: cli.remove,
        add: cli.files,
        stop: cli.stop,
    };

    let socket_path = config.socket_path();
    let mode = probe(&socket_path).await.with_context(|| {
        format!(
            "Error connecting to server socket '{}'",
            socket_path.display()
        )
    })?;

    match mode {
        Mode::Client(client) => {
            if actions.is_empty() {
                println!("quickshare is already running ({})", socket_path.display());
                return Ok(());
            }
            let failures = run_client(client, &actions, &mut std::io::stdout()).await?;
            if failures > 0 {
                anyhow::bail!("{} request(s) failed", failures);
            }
        }
        Mode::Server => {
            if actions.has_management() && actions.add.is_empty() {
                anyhow::bail!("No quickshare server is running");
            }
            if actions.has_management() {
                tracing::warn!("No server running, ignoring --ls, --rm and --stop");
            }
            run_server(&ServerOptions::from_config(&config), &actions.add).await?;
        }
    }

    Ok(())
}

async fn run_discover(config: &Config, window: Duration) -> Result<()> {
    println!("Discovering servers in network ... ");

    let target = SocketAddr::from((Ipv4Addr::BROADCAST, config.discovery_port()));
    let hosts = discover(target, window, Duration::from_secs(1)).await?;

    if hosts.is_empty() {
        println!("No servers found");
    }
    for host in hosts {
        println!(
            "  - {} (http://{}:{})",
            host.name,
            host.addr.ip(),
            config.http_port()
        );
    }
    Ok(())
}
