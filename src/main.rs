use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirage::config::HoneypotConfig;
use mirage::engine::Engine;
use mirage::events::TracingSink;
use mirage::intel::{AddressClassifier, CachedIntel};
use mirage::server;

/// How long classifier results stay cached per address
const INTEL_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Parser)]
#[command(name = "mirage", version, about = "Interactive shell honeypot")]
struct Args {
    /// TOML configuration file; MIRAGE_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persona to present, overriding the configuration
    #[arg(long)]
    persona: Option<String>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = HoneypotConfig::load(args.config.as_deref())
        .context("loading configuration")?;
    if let Some(persona) = args.persona {
        config.persona = persona;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let intel = Arc::new(CachedIntel::new(AddressClassifier, INTEL_CACHE_TTL));
    let engine = Arc::new(Engine::new(&config, Arc::new(TracingSink), intel)?);
    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("interrupt received");
        trigger.cancel();
    });

    server::serve(listener, engine, shutdown).await?;
    Ok(())
}
