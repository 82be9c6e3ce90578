//! HTTP routes for the file server.
//!
//! `/` and `/index.html` render the share index. Any other path names a
//! share: the leading `/` is dropped and the rest is looked up in the
//! registry. The registry is only ever read here.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use super::templates::TemplateEngine;
use crate::registry::{Registry, Share};

/// Size of the chunks a file is streamed in.
pub const CHUNK_SIZE: usize = 8192;

const NOT_FOUND_BODY: &str = "Object not found";
const SERVER_ERROR_BODY: &str = "Server error";

/// Shared application state.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub template_engine: TemplateEngine,
    /// Cancelled to end every download still streaming.
    pub downloads: CancellationToken,
}

/// Build the router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/*name", get(share_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    render_index(&state)
}

async fn share_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if name.is_empty() || name == "index.html" {
        return render_index(&state);
    }

    let Some(share) = state.registry.lookup(&name) else {
        debug!("No share named {:?}", name);
        return (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response();
    };

    match remote {
        Some(ConnectInfo(addr)) => info!("{} GET {}", addr, share.name),
        None => info!("GET {}", share.name),
    }

    match send_file(&share, &state.downloads).await {
        Ok(response) => response,
        Err(e) => {
            error!(
                "Error sending share {:?} from {}: {}",
                share.name,
                share.path.display(),
                e
            );
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_BODY).into_response()
        }
    }
}

fn render_index(state: &AppState) -> Response {
    let shares = state.registry.list();
    match state.template_engine.render_index(&shares) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_BODY).into_response()
        }
    }
}

/// Open the share's file and stream it back as an attachment.
async fn send_file(share: &Share, downloads: &CancellationToken) -> io::Result<Response> {
    let file = File::open(&share.path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }

    let disposition = format!("attachment; filename={}", share.name);
    let disposition = HeaderValue::from_bytes(disposition.as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let file = AbortableFile {
        file,
        abort: downloads.clone(),
    };
    let body = Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        ),
        (header::CONTENT_DISPOSITION, disposition),
        (header::CONTENT_LENGTH, HeaderValue::from(metadata.len())),
    ];

    Ok((StatusCode::OK, headers, body).into_response())
}

/// File reader that fails once `abort` is cancelled. The body stream then
/// errors and hyper drops the connection.
struct AbortableFile {
    file: File,
    abort: CancellationToken,
}

impl AsyncRead for AbortableFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.abort.is_cancelled() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "download aborted by shutdown",
            )));
        }
        Pin::new(&mut this.file).poll_read(cx, buf)
    }
}
