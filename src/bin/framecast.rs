//! framecast: relay an MJPEG decoder stream to WebSocket viewers

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast::{Relay, RelayConfig};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Video/input source handed to the decoder
    #[arg(short, long)]
    input: Option<String>,

    /// Treat the input as a recorded MJPEG byte file
    #[arg(long)]
    replay: bool,

    /// Viewer WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Detection backend URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Frame release interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Disable the detection side-channel
    #[arg(long)]
    no_detect: bool,
}

impl Args {
    fn into_config(self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if let Some(input) = self.input {
            config.source.input = input;
        }
        if self.replay {
            config.source.replay = true;
        }
        if let Some(port) = self.port {
            config.viewer.port = port;
        }
        if let Some(endpoint) = self.endpoint {
            config.detection.endpoint = endpoint;
        }
        if let Some(interval) = self.interval_ms {
            config.delivery.release_interval_ms = interval;
        }
        if self.no_detect {
            config.detection.enabled = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framecast=info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    info!("Framecast {} starting", env!("CARGO_PKG_VERSION"));
    info!("Source: {} (replay: {})", config.source.input, config.source.replay);
    if config.detection.enabled {
        info!("Detection backend: {}", config.detection.endpoint);
    }

    let mut relay = match Relay::start(&config).await {
        Ok(relay) => relay,
        Err(e) => {
            for suggestion in e.recovery_suggestions() {
                warn!("  - {}", suggestion);
            }
            return Err(e).context("failed to start relay");
        }
    };

    let result = tokio::select! {
        outcome = relay.wait() => outcome.map(|outcome| info!("Source finished: {:?}", outcome)),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("Interrupted");
            Ok(())
        }
    };

    let stats = relay.shutdown().await;
    info!(
        "Released {} of {} frames, {} detections ({} failed)",
        stats.frames_released,
        stats.frames_extracted,
        stats.detections.succeeded,
        stats.detections.failed
    );

    result.context("relay stopped")
}
