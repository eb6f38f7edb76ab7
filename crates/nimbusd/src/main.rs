//! nimbusd: the Nimbus daemon.
//!
//! Single binary that assembles the orchestration core:
//! - Execution backend (in-memory or Docker)
//! - One ledger + lifecycle manager per configured node
//! - Cluster scheduler
//! - Expiration sweeps
//! - REST API
//!
//! # Usage
//!
//! ```text
//! nimbusd serve --config nimbus.toml --port 8080 --sweep-interval 15s
//! nimbusd default-config > nimbus.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use nimbus_backend::{DockerBackend, DockerEndpoint, ExecutionBackend, InMemoryBackend};
use nimbus_core::{BackendConfig, BackendKind, NimbusConfig};
use nimbus_scheduler::ClusterScheduler;

#[derive(Parser)]
#[command(name = "nimbusd", about = "Nimbus orchestration daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and the per-node expiration sweeps.
    Serve {
        /// Topology file. Without one, the built-in two-node topology is used.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Sweep interval such as "15s" (overrides the config file).
        #[arg(long)]
        sweep_interval: Option<String>,
    },

    /// Print the built-in configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nimbusd=debug,nimbus=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            sweep_interval,
        } => {
            let config = load_config(config.as_deref(), port, sweep_interval)?;
            run_serve(config).await
        }
        Command::DefaultConfig => {
            print!("{}", NimbusConfig::two_node_default().to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(
    path: Option<&Path>,
    port: Option<u16>,
    sweep_interval: Option<String>,
) -> anyhow::Result<NimbusConfig> {
    let mut config = match path {
        Some(path) => NimbusConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NimbusConfig::two_node_default(),
    };
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(interval) = sweep_interval {
        config.server.sweep_interval = interval;
    }
    config.validate()?;
    Ok(config)
}

fn build_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn ExecutionBackend>> {
    match config.kind {
        BackendKind::Memory => Ok(Arc::new(InMemoryBackend::new())),
        BackendKind::Docker => {
            let endpoint = DockerEndpoint::resolve(config.docker_host.as_deref())
                .map_err(|e| anyhow::anyhow!("invalid docker host: {e}"))?;
            info!(?endpoint, "using docker backend");
            Ok(Arc::new(DockerBackend::new(endpoint)))
        }
    }
}

async fn run_serve(config: NimbusConfig) -> anyhow::Result<()> {
    info!("Nimbus daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let backend = build_backend(&config.backend)?;
    if let Err(e) = backend.list_units().await {
        warn!(backend = backend.kind(), error = %e, "execution backend not reachable yet");
    }

    let scheduler = Arc::new(ClusterScheduler::new(&config.nodes, backend));
    for node in &config.nodes {
        info!(node_id = %node.id, cpu = node.cpu, memory_mb = node.memory_mb, "node registered");
    }

    // ── Start background tasks ─────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_interval = config.sweep_interval()?;
    let sweep_handles = scheduler.start_expiration_sweeps(sweep_interval, shutdown_rx);

    // ── Start API server ───────────────────────────────────────

    let router = nimbus_api::build_router(scheduler.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    let served = server.await;

    // Stop sweeps whether the server exited cleanly or not.
    let _ = shutdown_tx.send(true);
    join_sweeps(sweep_handles).await;

    served?;
    info!(
        remaining = scheduler.list_all().await.len(),
        "Nimbus daemon stopped"
    );
    Ok(())
}

/// Wait for every sweep task to exit. Returns how many ended abnormally.
async fn join_sweeps(handles: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "expiration sweep task failed");
            failed += 1;
        }
    }
    failed
}
