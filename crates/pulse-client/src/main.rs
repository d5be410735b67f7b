//! # pulse-client
//!
//! Demo client: sends a Notify on every tick and logs what the server sends
//! back.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_client::{ClientConfig, ClientHandler, PulseClient};
use pulse_codec::Envelope;
use pulse_core::logging::init_subscriber;
use pulse_settings::loader::{load_settings_from_path, settings_path};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

/// Type id carried by the demo Notify frames.
const DEMO_TYPE_ID: u16 = 1;

/// Pulse demo client.
#[derive(Parser, Debug)]
#[command(name = "pulse-client", about = "Pulse demo client")]
struct Cli {
    /// Server address (`host:port`). Overrides settings.
    #[arg(long)]
    addr: Option<String>,

    /// Seconds between messages.
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,

    /// Payload of each message.
    #[arg(long, default_value = "Hello Server!")]
    message: String,

    /// Settings file (default `~/.pulse/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

struct LogHandler;

impl ClientHandler for LogHandler {
    fn on_connected(&self) {
        info!("session up");
    }

    fn on_message(&self, envelope: Envelope) {
        info!(
            msg_type = ?envelope.message_type(),
            type_id = envelope.type_id(),
            msg_id = envelope.msg_id(),
            payload = %String::from_utf8_lossy(&envelope.payload),
            "received"
        );
    }

    fn on_disconnected(&self) {
        info!("session down");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    init_subscriber(settings.logging.level.as_filter_str(), settings.logging.format);

    let mut config = ClientConfig::from(&settings);
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    let codec = settings
        .codec
        .build_codec(settings.server.max_message_size)
        .context("Invalid codec settings")?;

    let client = Arc::new(PulseClient::new(config, codec, Arc::new(LogHandler)));
    let runner = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });

    let period = Duration::from_secs(args.interval_secs.max(1));
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut states = client.subscribe_state();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if client.state().is_connected() && client.notify(DEMO_TYPE_ID, args.message.as_bytes()) {
                    info!(message = %args.message, "sent");
                }
            }
            changed = states.changed() => {
                if changed.is_err() || states.borrow().is_terminal() {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("Shutting down...");
                client.shutdown();
                break;
            }
        }
    }

    runner
        .await
        .context("Client task panicked")?
        .context("Client stopped with an error")?;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["pulse-client"]);
        assert!(cli.addr.is_none());
        assert_eq!(cli.interval_secs, 5);
        assert_eq!(cli.message, "Hello Server!");
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "pulse-client",
            "--addr",
            "10.1.1.1:9000",
            "--interval-secs",
            "2",
            "--message",
            "hi",
        ]);
        assert_eq!(cli.addr.as_deref(), Some("10.1.1.1:9000"));
        assert_eq!(cli.interval_secs, 2);
        assert_eq!(cli.message, "hi");
    }
}
