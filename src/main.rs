//! Main entry point for the inat-downloader CLI

use clap::Parser;
use inat_downloader::cli::Cli;
use inat_downloader::metrics;
use inat_downloader::shutdown::ShutdownCoordinator;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("inat_downloader=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = metrics::init_metrics(addr) {
            warn!("Metrics disabled: {}", e);
        }
    }

    // Ctrl+C requests a stop; the engine saves its cursor before returning
    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - saving progress...");
                shutdown.request_shutdown();
            }
        }
    });

    let result = cli
        .execute(shutdown)
        .await
        .map_err(|e| (e.kind(), anyhow::anyhow!(e)));

    if let Err((kind, e)) = result {
        error!(kind = %kind, "Command failed: {:#}", e);
        std::process::exit(1);
    }
}
