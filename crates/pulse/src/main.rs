//! # pulse
//!
//! Pulse server binary: loads settings, installs logging and metrics, and
//! serves the echo handler until ctrl-c.

#![deny(unsafe_code)]

mod echo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::logging::init_subscriber;
use pulse_server::metrics::install_recorder;
use pulse_server::{MemoryStore, PulseServer, ServerConfig};
use pulse_settings::loader::{load_settings_from_path, settings_path};
use pulse_settings::{BackendKind, PulseSettings};
use tracing::{info, warn};

use crate::echo::EchoHandler;

/// Pulse WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Pulse WebSocket application-protocol server")]
struct Cli {
    /// Settings file (default `~/.pulse/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind. Overrides settings.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign). Overrides settings.
    #[arg(long)]
    port: Option<u16>,

    /// I/O backend: `poller` or `tasks`. Overrides settings.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Port for `/health` and `/metrics` (0 disables). Overrides settings.
    #[arg(long)]
    health_port: Option<u16>,
}

impl Cli {
    /// CLI flags win over file and environment.
    fn apply(&self, settings: &mut PulseSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(backend) = self.backend {
            settings.server.backend = backend;
        }
        if let Some(port) = self.health_port {
            settings.server.health_port = port;
        }
    }
}

fn load(args: &Cli) -> Result<PulseSettings> {
    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load(&args)?;
    init_subscriber(settings.logging.level.as_filter_str(), settings.logging.format);

    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let codec = settings
        .codec
        .build_codec(settings.server.max_message_size)
        .context("Invalid codec settings")?;
    let store = Arc::new(MemoryStore::new());
    let server = PulseServer::new(
        ServerConfig::from(&settings),
        Arc::new(EchoHandler::new(store)),
        codec,
    )
    .with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        %addr,
        backend = %settings.server.backend,
        encryption = %settings.codec.encryption,
        "Pulse listening on ws://{addr}/"
    );

    let mut tasks = vec![handle];
    if settings.server.health_port != 0 {
        let health_addr = format!("{}:{}", settings.server.host, settings.server.health_port);
        let (_, http) = server
            .serve_http(&health_addr)
            .await
            .context("Failed to bind health port")?;
        tasks.push(http);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if server.shutdown().graceful_shutdown(tasks, None).await {
        info!("Shutdown complete");
    } else {
        warn!("Shutdown incomplete");
    }
    Ok(())
}
