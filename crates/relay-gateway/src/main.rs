//! # relay-gateway
//!
//! Relay gateway binary: loads settings, initializes logging and metrics,
//! and serves the event bus to WebSocket clients until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::GatewayServer;
use relay_settings::RelaySettings;

/// Relay gateway server.
#[derive(Parser, Debug)]
#[command(name = "relay-gateway", about = "Real-time event gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `relay_server=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let path = cli.settings.clone().unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    if settings.logging.json {
        relay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        relay_core::logging::init_subscriber(&settings.logging.level);
    }

    let metrics = match relay_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let server = GatewayServer::new(settings, metrics);
    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Relay gateway listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.close("SIGINT").await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["relay-gateway"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn cli_overrides_host_and_port() {
        let cli = Cli::parse_from(["relay-gateway", "--host", "0.0.0.0", "--port", "9000"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn cli_overrides_logging() {
        let cli = Cli::parse_from(["relay-gateway", "--log-level", "debug", "--json-logs"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn load_reads_settings_file_then_applies_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 7000, "idleTimeoutMs": 1000}}"#).unwrap();

        let cli = Cli::parse_from([
            "relay-gateway",
            "--settings",
            path.to_str().unwrap(),
            "--port",
            "7001",
        ]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.server.idle_timeout_ms, 1000);
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{broken").unwrap();

        let cli = Cli::parse_from(["relay-gateway", "--settings", path.to_str().unwrap()]);
        assert!(load(&cli).is_err());
    }
}
