pub(crate) mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use axum::http::{StatusCode, Uri, header};
use axum::response::IntoResponse;
use include_dir::{Dir, include_dir};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::executor::Executor;
use crate::core::files::FileManager;
use crate::core::task::manager::Manager;

static STATIC_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/web/static");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) manager: Arc<Manager>,
    pub(crate) executor: Arc<Executor>,
    pub(crate) files: Arc<FileManager>,
    pub(crate) dev_mode: bool,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(
        manager: Arc<Manager>,
        executor: Arc<Executor>,
        files: Arc<FileManager>,
        dev_mode: bool,
    ) -> Self {
        ApiServer {
            state: AppState {
                manager,
                executor,
                files,
                dev_mode,
            },
        }
    }

    /// Bind and serve until the shutdown token fires. In-flight requests get
    /// to finish; the listener stops accepting immediately.
    pub async fn serve(self, addr: &str, shutdown: CancellationToken) -> Result<()> {
        let app = router::build_router(self.state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

/// Serve the UI: from disk in dev mode, from the embedded bundle otherwise.
/// Unknown paths fall back to index.html so the UI owns its routing.
pub(crate) async fn static_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    uri: Uri,
) -> impl IntoResponse {
    let mut path = uri.path().trim_start_matches('/').to_string();
    if path.is_empty() {
        path = "index.html".to_string();
    }

    if state.dev_mode {
        let disk_path = std::path::Path::new("web/static").join(&path);
        let bytes = match tokio::fs::read(&disk_path).await {
            Ok(bytes) => bytes,
            Err(_) => match tokio::fs::read("web/static/index.html").await {
                Ok(bytes) => bytes,
                Err(_) => return (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
            },
        };
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        return ([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response();
    }

    match STATIC_DIR
        .get_file(&path)
        .or_else(|| STATIC_DIR.get_file("index.html"))
    {
        Some(file) => {
            let mime = mime_guess::from_path(file.path()).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.to_string())],
                file.contents().to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}
