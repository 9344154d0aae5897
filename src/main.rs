//! chainmesh - launch local blockchain nodes and peer them into a full mesh
//!
//! Each subdirectory of the base directory holds one chain's node binary and
//! optional `.conf` argument file. The launcher starts every node, waits for
//! each to report its enode address, then connects every pair as peers.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

mod chain;
mod config;
mod coordination;
mod error;
mod metrics;
mod process;
mod rpc;

use chain::ChainResolver;
use config::{Overrides, Settings};
use coordination::{PeerMeshBuilder, Readiness, ReadinessPoller};
use metrics::MetricsServer;
use process::ProcessSupervisor;

/// Launch blockchain nodes and connect them into a fully peered mesh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing one subdirectory per chain
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Comma-separated chain directory names to skip
    #[arg(short, long)]
    exclude: Option<String>,

    /// Host used to reach each node's RPC port
    #[arg(long)]
    rpc_domain: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.log_json);

    info!("Starting chainmesh v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load(
        args.config.as_deref(),
        Overrides {
            base_dir: args.base_dir,
            exclude: args.exclude,
            rpc_domain: args.rpc_domain,
        },
    )?;

    // Resolve chain directories before anything is started
    let chains = ChainResolver::new(settings.launcher.clone()).resolve()?;
    if chains.is_empty() {
        warn!(
            "No chains found in {}",
            settings.launcher.base_dir.display()
        );
        return Ok(());
    }
    metrics::record_chains_resolved(chains.len());
    info!("Resolved {} chains", chains.len());

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start every chain process
    let mut supervisor =
        ProcessSupervisor::start(&chains, settings.launcher.log_file_name.as_deref());

    // Wait for readiness, then build the mesh
    let mesh_handle = tokio::spawn({
        let chains = chains.clone();
        let shutdown = supervisor.shutdown_handle().subscribe();
        let poller = ReadinessPoller::new(chains.clone(), settings.launcher.poll_interval())
            .with_deadline(settings.launcher.readiness_timeout());
        async move {
            match poller.wait_all_known(shutdown).await {
                Ok(Readiness::AllKnown) => match PeerMeshBuilder::new(chains).connect_all().await {
                    Ok(outcomes) => {
                        for outcome in outcomes.iter().filter(|o| !o.is_peered()) {
                            warn!(
                                "Pair {:?} not peered: {} -> {} ({})",
                                outcome.pair, outcome.from, outcome.to, outcome.direction
                            );
                        }
                    }
                    Err(e) => error!("Peer mesh error: {}", e),
                },
                Ok(Readiness::Cancelled) => {}
                Err(e) => error!("Readiness polling stopped: {}; skipping peering", e),
            }
        }
    });

    info!("chainmesh is running");

    // Run until a process fails or a shutdown signal arrives
    let result = supervisor.run(shutdown_signal()).await;

    mesh_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Stopped {} chains", supervisor.killed().len());

    match result {
        Ok(()) => {
            info!("chainmesh stopped");
            Ok(())
        }
        Err(e) => {
            error!("chainmesh failed: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainmesh=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
