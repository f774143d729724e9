//! Replistore Gateway
//!
//! Serves the S3-style API over replicated file storage nodes.

use anyhow::{Context, Result};
use clap::Parser;
use replistore_common::{Config, LogFormat};
use replistore_gateway::Gateway;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "replistore-gateway")]
#[command(about = "Replistore replicating S3 gateway")]
#[command(version)]
struct Args {
    /// Configuration file path (defaults apply when it does not exist)
    #[arg(short, long, default_value = "replistore.toml", env = "REPLISTORE_CONFIG")]
    config: PathBuf,

    /// Listen address, overrides `server.listen`
    #[arg(short, long, env = "REPLISTORE_LISTEN")]
    listen: Option<String>,

    /// Data directory; node and metadata paths are placed under it
    #[arg(long, env = "REPLISTORE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level, overrides `logging.level`
    #[arg(long, env = "REPLISTORE_LOG_LEVEL")]
    log_level: Option<String>,
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(listen) = &args.listen {
        config.server.listen.clone_from(listen);
    }
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir.clone_from(dir);
        for node in &mut config.storage.nodes {
            node.path = dir.join(&node.id);
        }
        config.metadata.path = dir.join("metadata.redb");
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    apply_overrides(&mut config, &args);

    init_tracing(&config);

    info!("Starting Replistore Gateway");
    config.validate().context("invalid configuration")?;
    info!(
        "Storage nodes: {}",
        config
            .storage
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("Third party source: {:?}", config.third_party.kind);

    let gateway = Gateway::from_config(&config).await?;
    gateway.start()?;

    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.listen))?;
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, gateway.router().into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.stop().await;
    info!("Replistore Gateway stopped");
    Ok(())
}
