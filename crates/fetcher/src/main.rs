//! Parcel fetcher agent binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use parcel_core::SpecializeRequest;
use parcel_core::config::FetcherConfig;
use parcel_fetcher::{AppState, Fetcher, Readiness, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parcel fetcher - prepares a sandbox and specializes its runtime
#[derive(Parser, Debug)]
#[command(name = "parcel-fetcher")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PARCEL_CONFIG",
        default_value = "config/fetcher.toml"
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

    tracing::info!("Parcel fetcher v{}", env!("CARGO_PKG_VERSION"));

    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: FetcherConfig = figment
        .merge(Env::prefixed("PARCEL_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let startup_request: Option<SpecializeRequest> = match &config.specialize_request {
        Some(raw) if config.specialize_on_startup => Some(
            serde_json::from_str(raw).context("failed to decode startup specialize request")?,
        ),
        _ => None,
    };

    let fetcher = Arc::new(Fetcher::from_config(&config));
    fetcher
        .create_dirs()
        .await
        .context("failed to create sandbox directories")?;
    tracing::info!(
        shared_volume = %config.shared_volume_path.display(),
        registries = config.registry_credentials.len(),
        "Fetcher initialized"
    );

    let readiness = match startup_request {
        Some(_) => Readiness::pending(),
        None => Readiness::ready(),
    };

    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    let app = create_router(AppState::new(fetcher.clone(), readiness.clone()));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    let server = async move { axum::serve(listener, app).await };

    let Some(request) = startup_request else {
        server.await?;
        return Ok(());
    };

    let startup = tokio::spawn(async move {
        tracing::info!("Specializing on startup");
        fetcher.specialize(&request).await?;
        readiness.mark_ready();
        tracing::info!("Startup specialization complete, ready to serve");
        Ok::<_, parcel_fetcher::FetchError>(())
    });

    // A failed startup specialization ends the process; success keeps serving.
    tokio::select! {
        result = server => result?,
        Ok(Err(e)) = startup => {
            return Err(anyhow::Error::new(e).context("startup specialization failed"));
        }
    }

    Ok(())
}
