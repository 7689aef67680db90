//! gridtuned — the gridtune daemon.
//!
//! Single binary that assembles the optimization layer:
//! - Cache manager
//! - Load balancer + health checks
//! - Autoscaler
//! - Metrics sampling + alerting
//! - Optimization loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gridtuned run --config /etc/gridtune/gridtune.toml --listen 0.0.0.0:8700
//! gridtuned check-config --config /etc/gridtune/gridtune.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridtune_autoscale::{Autoscaler, ScaleAction, ScaleCallback};
use gridtune_balancer::http_probe_fn;
use gridtune_coordinator::{Coordinator, HttpProcessor};
use gridtune_core::GridtuneConfig;

const DEFAULT_LOG_FILTER: &str = "info,gridtune=debug,gridtuned=debug";

#[derive(Parser)]
#[command(name = "gridtuned", about = "gridtune adaptive optimization daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to gridtune.toml.
        #[arg(long, short)]
        config: PathBuf,

        /// Address the API listens on.
        #[arg(long, default_value = "0.0.0.0:8700")]
        listen: SocketAddr,

        /// Path POSTed on the selected node for each cache miss.
        #[arg(long, default_value = "/process")]
        processor_path: String,
    },
    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            listen,
            processor_path,
        } => run(&config, listen, processor_path).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<GridtuneConfig> {
    GridtuneConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}: ok", path.display());
    println!("  cache:      {:?}, {} MB", config.cache.strategy, config.cache.max_size_mb);
    println!("  balancer:   {:?}, {} nodes", config.balancer.algorithm, config.nodes.len());
    println!(
        "  scaling:    {}..={} instances",
        config.scaling.min_instances, config.scaling.max_instances
    );
    println!(
        "  alerting:   {} rules, {} channels",
        config.alerting.rules.len(),
        config.alerting.channels.len()
    );
    Ok(())
}

/// Scale actions are logged for an operator or external controller to
/// act on; the daemon does not own any infrastructure.
fn log_scale_fn() -> ScaleCallback {
    Arc::new(
        |action: ScaleAction| -> Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>> {
            Box::pin(async move {
                info!(?action, "scale action requested");
                Ok(())
            })
        },
    )
}

async fn run(config_path: &Path, listen: SocketAddr, processor_path: String) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    info!(config = %config_path.display(), "gridtune daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let probe_path = config.balancer.health_check_path.clone();
    let probe_timeout = Duration::from_millis(config.balancer.health_check_timeout_ms);
    let scaler = Autoscaler::new(config.scaling.clone()).with_scale_fn(log_scale_fn());
    let processor = Arc::new(HttpProcessor::new(processor_path));
    let coordinator = Arc::new(Coordinator::new(config, processor)?.with_autoscaler(scaler));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sampling = tokio::spawn(Arc::clone(coordinator.monitoring()).run(
        Arc::clone(coordinator.collector()),
        Arc::clone(coordinator.alerts()),
        shutdown_rx.clone(),
    ));
    let health = tokio::spawn(
        Arc::clone(coordinator.balancer()).run_health_checks(http_probe_fn(probe_path, probe_timeout), shutdown_rx.clone()),
    );
    let optimizer = tokio::spawn(Arc::clone(&coordinator).run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = gridtuned::build_router(Arc::clone(&coordinator));
    info!(addr = %listen, "API server starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    for (name, handle) in [("sampling", sampling), ("health", health), ("optimizer", optimizer)] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "background task failed");
        }
    }

    info!("gridtune daemon stopped");
    Ok(())
}
