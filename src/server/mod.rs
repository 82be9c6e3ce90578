//! HTTP file server.

pub mod routes;
pub mod templates;

pub use routes::{build_router, AppState};
pub use templates::{ShareView, TemplateEngine, Templates};

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::registry::Registry;

/// Handle to a running HTTP server.
pub struct HttpHandle {
    local_addr: SocketAddr,
    task: JoinHandle<std::io::Result<()>>,
    downloads: CancellationToken,
}

impl HttpHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server to finish after shutdown was requested.
    ///
    /// Downloads still running after `grace` fail on their next read and
    /// their connections are dropped. A client that has stopped reading
    /// keeps its connection until it reads again or the runtime shuts down.
    pub async fn wait(mut self, grace: Duration) {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
            Ok(Err(e)) => error!("HTTP server task failed: {}", e),
            Err(_) => {
                warn!("Aborting in-flight downloads");
                self.downloads.cancel();
                self.task.abort();
            }
        }
    }
}

/// Bind the HTTP listener and serve the registry until `shutdown` is
/// cancelled.
pub async fn start_server(
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> anyhow::Result<HttpHandle> {
    let template_engine = TemplateEngine::new().context("Failed to load templates")?;
    let downloads = CancellationToken::new();
    let state = Arc::new(AppState {
        registry,
        template_engine,
        downloads: downloads.clone(),
    });
    let app = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!("Started http://{}", display_addr(local_addr));

    let task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    });

    Ok(HttpHandle {
        local_addr,
        task,
        downloads,
    })
}

/// Address to show users: an unspecified bind address is reachable as
/// localhost.
fn display_addr(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("localhost:{}", addr.port())
    } else {
        addr.to_string()
    }
}
