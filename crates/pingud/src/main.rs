//! pingud: watches a fixed set of peers and logs their liveness.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use libpingu::{Engine, PeerAddr};
use pingu_core::config::PinguConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Config before logging so `verbose` can pick the default filter.
    let written = PinguConfig::write_default_if_missing();
    let loaded = PinguConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let default_level = if config.engine.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Err(e) = &loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.node.bind_addr.clone());

    let engine = Engine::bind(&bind_addr, config.engine.clone())
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    engine.start();
    tracing::info!(addr = %engine.local_addr()?, "pingud started");

    for raw in &config.node.peers {
        match engine.register(raw) {
            Ok(peer) => tracing::info!(%peer, "watching peer"),
            Err(e) => tracing::warn!(error = %e, "skipping configured peer"),
        }
    }

    let ticker = engine.broadcast_with_ticker(
        config.node.broadcast_period(),
        config.node.broadcast_timeout(),
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut report = tokio::time::interval(config.node.report_interval());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = report.tick() => log_health(&engine),
        }
    }

    ticker.cancel();
    engine.close().await;
    tracing::info!("pingud stopped");
    Ok(())
}

fn log_health(engine: &Engine) {
    let health = engine.health_table();
    let alive = health.values().filter(|a| **a).count();
    tracing::info!(peers = engine.peers().len(), alive, "health table snapshot");

    let mut rows: Vec<(PeerAddr, bool)> = health.into_iter().collect();
    rows.sort();
    for (peer, up) in rows {
        tracing::info!(%peer, alive = up, "  peer");
    }
}
