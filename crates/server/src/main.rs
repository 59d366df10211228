//! Parcel storage service binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use parcel_core::config::StorageServiceConfig;
use parcel_server::{AppState, ArchivePruner, create_router};
use parcel_storage::BlobStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parcel - archive storage service
#[derive(Parser, Debug)]
#[command(name = "parceld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PARCEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Parcel storage service v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; PARCEL_ env vars can provide or override everything.
    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: StorageServiceConfig = figment
        .merge(Env::prefixed("PARCEL_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    parcel_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = BlobStore::from_config(&config.storage)
        .await
        .context("failed to initialize blob store")?;
    store
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(
        write_container = %config.storage.write.container(),
        fallbacks = config.storage.fallbacks.len(),
        "Blob store initialized"
    );
    let store = Arc::new(store);

    if config.pruner.enabled && config.pruner.oracle_url.is_none() {
        tracing::warn!("Pruner enabled but no oracle_url configured, pruning disabled");
    }
    match ArchivePruner::from_config(store.clone(), &config.pruner) {
        Some(pruner) => {
            Arc::new(pruner).spawn(config.pruner.interval());
            tracing::info!(
                interval_secs = config.pruner.interval_secs,
                grace_period_secs = config.pruner.grace_period_secs,
                "Archive pruner spawned"
            );
        }
        None => tracing::info!("Archive pruner disabled"),
    }

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let app = create_router(AppState::new(config, store));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
