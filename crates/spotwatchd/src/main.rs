//! spotwatchd — the spot interruption exporter.
//!
//! Serves a Prometheus metrics endpoint that, on every scrape, polls the
//! instance metadata service for spot termination notices and rebalance
//! recommendations. Optionally decorates every gauge with the labels of
//! the Kubernetes node the instance backs.
//!
//! # Usage
//!
//! ```text
//! spotwatchd --bind-addr 0.0.0.0:9189 --use-imdsv2
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spotwatch_collector::{CollectorConfig, TerminationCollector};
use spotwatch_metadata::MetadataClient;

#[derive(Parser)]
#[command(name = "spotwatchd", about = "Spot interruption metrics exporter")]
struct Cli {
    /// Bind address for the metrics server.
    #[arg(long, default_value = "0.0.0.0:9189")]
    bind_addr: SocketAddr,

    /// Path of the metrics endpoint.
    #[arg(long, default_value = "/metrics")]
    metrics_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Base URL of the instance metadata service.
    #[arg(long, default_value = "http://169.254.169.254/latest/meta-data/")]
    metadata_endpoint: String,

    /// URL of the IMDSv2 token endpoint.
    #[arg(long, default_value = "http://169.254.169.254/latest/api/token")]
    token_endpoint: String,

    /// Negotiate an IMDSv2 session token before each scrape.
    #[arg(long)]
    use_imdsv2: bool,

    /// Attach the labels of the Kubernetes node named by $NODE_NAME.
    #[arg(long)]
    attach_node_labels: bool,

    /// Path to a kubeconfig file for the node label lookup.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&cli.log_level))
                .map_err(|e| anyhow::anyhow!("invalid log level {:?}: {e}", cli.log_level))?,
        )
        .init();

    info!("spotwatch exporter starting");

    let extra_labels = if cli.attach_node_labels {
        match spotwatch_labels::resolve_node_labels(cli.kubeconfig.as_deref()).await {
            Ok(labels) => {
                info!(count = labels.len(), "node labels attached");
                labels
            }
            Err(e) => {
                error!(error = %e, "failed to resolve node labels");
                std::process::exit(1);
            }
        }
    } else {
        BTreeMap::new()
    };

    let client = MetadataClient::new(&cli.metadata_endpoint, &cli.token_endpoint)?;
    let collector = Arc::new(TerminationCollector::new(
        client,
        CollectorConfig {
            use_imdsv2: cli.use_imdsv2,
            extra_labels,
        },
    ));

    let router = spotwatch_api::build_router(collector, &cli.metrics_path);

    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await?;
    info!(addr = %cli.bind_addr, path = %cli.metrics_path, "metrics server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("spotwatch exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = term.recv() => info!("termination signal received, shutting down"),
    }
}
