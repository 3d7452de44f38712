use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::config::ToolCatalog;
use crate::core::executor::Executor;
use crate::core::files::discovery::FileDiscovery;
use crate::core::files::{DEFAULT_DIRECTORY_PATH, FileManager};
use crate::core::storage::Store;
use crate::core::task::manager::Manager;
use crate::interfaces::web::ApiServer;

#[derive(Parser, Debug)]
#[command(name = "conductor", about = "Queued, observable task runner for CLI tools")]
pub struct Args {
    /// Bind address; a bare `:port` binds all interfaces.
    #[arg(long, default_value = ":8080")]
    pub addr: String,

    /// Default worker count for tools that do not set their own.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Path to the tool catalog; written with defaults when absent.
    #[arg(long, default_value = "./config/tools.json")]
    pub config: PathBuf,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "./data/conductor.db")]
    pub db: PathBuf,

    /// Serve static assets from the filesystem instead of the embedded copy.
    #[arg(long)]
    pub dev: bool,
}

pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store = Store::open(&args.db)
        .with_context(|| format!("failed to open database {}", args.db.display()))?;

    let manager = Arc::new(Manager::new(store.clone()));
    let files = Arc::new(FileManager::new(store, DEFAULT_DIRECTORY_PATH));
    manager.set_discovery(Arc::new(FileDiscovery::new(files.clone())));

    let catalog = ToolCatalog::load_or_default(&args.config)?;
    let executor = Arc::new(Executor::new(catalog, args.workers, manager.clone()));
    executor.start().await;

    let shutdown = CancellationToken::new();
    let server = ApiServer::new(manager, executor.clone(), files, args.dev);
    let server_handle = {
        let addr = normalize_addr(&args.addr);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.serve(&addr, shutdown).await })
    };

    wait_for_signal().await;
    info!("shutting down");

    shutdown.cancel();
    executor.stop().await;
    server_handle
        .await
        .context("server task panicked")?
        .context("server failed")?;

    info!("server exited");
    Ok(())
}

/// `:8080` is accepted for parity with the usual flag style; TcpListener
/// wants a host part.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
