//! # plexus
//!
//! Broker server binary: loads settings, initialises logging and metrics,
//! and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use plexus_server::{PlexusServer, ServerConfig};
use plexus_settings::{LogFormat, LoggingSettings, PlexusSettings};
use plexus_telemetry::{OutputFormat, TelemetryConfig};
use tracing::Level;

/// Real-time module message broker.
#[derive(Parser, Debug)]
#[command(name = "plexus", about = "Real-time module message broker", version)]
struct Cli {
    /// Host to bind (overrides settings and `PLEXUS_HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PLEXUS_PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.plexus/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format: `pretty` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Flags win over every other settings layer.
    fn apply(&self, settings: &mut PlexusSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    let module_levels = logging
        .module_levels
        .iter()
        .filter_map(|(module, level)| {
            plexus_telemetry::parse_level(level).map(|level| (module.clone(), level))
        })
        .collect();
    TelemetryConfig {
        log_level: plexus_telemetry::parse_level(&logging.level).unwrap_or(Level::INFO),
        module_levels,
        format: match logging.format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Json => OutputFormat::Json,
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(plexus_settings::settings_path);
    let mut settings = plexus_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    plexus_telemetry::init_telemetry(&telemetry_config(&settings.logging))
        .context("Failed to initialize logging")?;
    let metrics_handle = plexus_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = PlexusServer::new(ServerConfig::from(&settings), Some(metrics_handle));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(settings = %settings_path.display(), "plexus listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
