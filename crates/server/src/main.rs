//! HyperFS server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hyperfs_core::config::AppConfig;
use hyperfs_server::{AppState, create_router, sweep};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// HyperFS - content-addressed file storage with a virtual namespace
#[derive(Parser, Debug)]
#[command(name = "hyperfsd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HYPERFS_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Port to bind, overriding the configured bind address
    #[arg(short, long, env = "HYPERFS_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("HyperFS v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration. The file is optional: every setting has a default
    // and the bound port is the only parameter a deployment must pick.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("HYPERFS_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if let Some(port) = args.port {
        if port == 0 {
            anyhow::bail!("port must be in 1..=65535");
        }
        config.server = config.server.clone().with_port(port);
    }

    // Initialize the blob store
    let blobs = hyperfs_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob store")?;
    blobs
        .health_check()
        .await
        .context("blob store health check failed")?;
    tracing::info!(data_dir = %config.storage.data_dir.display(), "Blob store initialized");

    // Initialize the catalog
    let catalog = hyperfs_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize catalog")?;
    tracing::info!(path = %config.metadata.path.display(), "Catalog initialized");

    // Reconcile catalog and data directory before accepting requests
    sweep::run_startup_sweep(&catalog, &blobs, &config.storage.tmp_dir)
        .await
        .context("startup sweep failed")?;

    let state = AppState::new(config.clone(), catalog, blobs);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
