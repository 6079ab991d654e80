//! partrelay - multipart form to S3 multipart upload relay

use clap::Parser;
use partrelay::api::handlers::AppState;
use partrelay::config::{BackendConfig, Config};
use partrelay::storage::{MemoryTransport, MultipartTransport, S3Transport};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// partrelay - stream uploaded files into S3 multipart uploads
#[derive(Parser, Debug)]
#[command(name = "partrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Destination bucket (overrides config)
    #[arg(short, long, value_name = "BUCKET")]
    bucket: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    if let Some(ref bucket) = cli.bucket {
        config.bucket = bucket.clone();
    }
    config.validate()?;

    let log_level = if cli.verbose {
        "partrelay=trace,tower_http=trace".to_string()
    } else {
        config.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting partrelay upload server");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Bucket: {}", config.bucket);
    if let Some(ref root) = config.key_root {
        info!("  Key root: {}", root);
    }
    info!("  Namespace field: {}", config.namespace_field);
    info!("  Max concurrent parts per file: {}", config.max_concurrent_parts);
    info!(
        "  Max upload size: {} MB",
        config.max_upload_size / 1024 / 1024
    );

    let transport: Arc<dyn MultipartTransport> = match &config.backend {
        BackendConfig::Memory => {
            warn!("  Backend: memory (uploads are kept in process memory and lost on exit)");
            Arc::new(MemoryTransport::new())
        }
        BackendConfig::S3 {
            endpoint, region, ..
        } => {
            info!("  Backend: S3");
            info!("  Region: {}", region);
            if let Some(ep) = endpoint {
                info!("  Endpoint: {}", ep);
            }
            Arc::new(S3Transport::new(&config.backend)?)
        }
    };

    let state = Arc::new(AppState::new(transport, &config));
    let app = partrelay::api::router(state);

    // Start server with graceful shutdown
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("partrelay listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
