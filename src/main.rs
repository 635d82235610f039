use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use vigil_conn::mock::MockConnector;
use vigil_conn::{Supervisor, Timing};
use vigil_core::{EventLog, DEFAULT_LOG_CAPACITY};
use vigil_store::{sessions, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting vigil");

    // State file path
    let state_path = std::env::var("VIGIL_STATE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_home().join(".vigil").join("state.json"));

    let store = Arc::new(Store::open(&state_path));
    tracing::info!(path = %state_path.display(), "State loaded");

    // Seed the initial admin if no admin exists yet. A generated token is
    // printed exactly once; record it, it is not shown again.
    let seed_token = std::env::var("VIGIL_ADMIN_TOKEN").ok();
    let generated = seed_token.is_none();
    if let Some(admin) = store.ensure_admin(seed_token) {
        if generated {
            tracing::info!(token = %admin.token, "Admin user seeded with generated token");
        } else {
            tracing::info!("Admin user seeded from VIGIL_ADMIN_TOKEN");
        }
    }

    // Expired-session sweep
    let _sweep = sessions::start_sweep_task(
        Arc::clone(&store),
        std::time::Duration::from_secs(60),
    );

    let log = Arc::new(EventLog::new(DEFAULT_LOG_CAPACITY));

    // The protocol client is a wiring seam; the scripted connector stands
    // in until a real one is plugged here.
    let connector = Arc::new(MockConnector::new());
    let conn = Supervisor::spawn(
        connector,
        Arc::clone(&store),
        Arc::clone(&log),
        Timing::default(),
    );

    // Start server
    let config = vigil_server::ServerConfig::default();
    let port = config.port;
    let _handle = vigil_server::start(config, Arc::clone(&store), conn.clone(), log)
        .await
        .context("failed to start server")?;

    tracing::info!(port = port, "vigil ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    let _ = conn.stop("system").await;
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
