//! # pairing-relay
//!
//! Relay daemon: resolves settings, installs logging and metrics, picks the
//! registry/bus backend, and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use relay_core::SessionId;
use relay_server::bus::MessageBus;
use relay_server::bus::redis::RedisBus;
use relay_server::registry::SessionStore;
use relay_server::registry::redis::RedisSessionStore;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{RelaySettings, StoreBackend};

/// Session-pairing relay server.
#[derive(Parser, Debug)]
#[command(name = "pairing-relay", about = "Session-pairing relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$RELAY_CONFIG` or `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Registry and bus backend (overrides settings).
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// Redis URL for the redis backend (overrides settings).
    #[arg(long)]
    redis_url: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreArg {
    Memory,
    Redis,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => Self::Memory,
            StoreArg::Redis => Self::Redis,
        }
    }
}

impl Cli {
    /// Settings from file and env, with CLI flags on top.
    fn resolve_settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.config {
            Some(path) => relay_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => relay_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(store) = self.store {
            settings.store.backend = store.into();
        }
        if let Some(url) = &self.redis_url {
            settings.store.redis_url.clone_from(url);
        }
        Ok(settings)
    }
}

async fn backends(settings: &RelaySettings) -> Result<(Arc<dyn SessionStore>, Arc<dyn MessageBus>)> {
    match settings.store.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory registry and bus (single instance)");
            Ok((
                Arc::new(relay_server::registry::MemorySessionStore::new()),
                Arc::new(relay_server::bus::MemoryBus::new()),
            ))
        }
        StoreBackend::Redis => {
            let url = settings.store.redis_url.as_str();
            let store = RedisSessionStore::connect(url)
                .await
                .context("Failed to connect session store to redis")?;
            let bus = RedisBus::connect(url)
                .await
                .context("Failed to connect message bus to redis")?;
            Ok((Arc::new(store), Arc::new(bus)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    let settings = args.resolve_settings()?;

    relay_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let metrics = relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let (store, bus) = backends(&settings).await?;
    let server = RelayServer::new(ServerConfig::from(&settings), store, bus).with_metrics(metrics);

    if let Some(preset) = &settings.session.preset {
        let session = server
            .context()
            .registry
            .create_with(SessionId::from(preset.id.as_str()), preset.token.clone())
            .await
            .context("Failed to create preset session")?;
        tracing::info!(session_id = %session.id, "preset session ready");
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("pairing relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = server.shutdown().drain(vec![handle]).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_are_optional() {
        let cli = Cli::parse_from(["pairing-relay"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.store.is_none());
    }

    #[test]
    fn cli_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"host":"10.0.0.1","port":4000}}"#).unwrap();

        let cli = Cli::parse_from([
            "pairing-relay",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "5000",
            "--store",
            "redis",
            "--redis-url",
            "redis://cache:6379",
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.store.backend, StoreBackend::Redis);
        assert_eq!(settings.store.redis_url, "redis://cache:6379");
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let cli = Cli::parse_from(["pairing-relay", "--config", path.to_str().unwrap()]);
        assert!(cli.resolve_settings().is_err());
    }
}
