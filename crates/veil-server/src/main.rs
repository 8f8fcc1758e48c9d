//! # veil-server
//!
//! Real-time anonymous group chat server.
//!
//! This binary provides:
//! - **WebSocket gateway** for live chat events (join, messages, typing,
//!   presence heartbeats)
//! - **Presence tracking** with a grace period, so page refreshes do not
//!   flicker a user offline
//! - **Anonymous per-group identities** with collision-safe assignment
//! - **Mutual block filtering** on message fan-out and history reads
//! - **Auto-delete sweeper** that tombstones expired messages
//! - **REST API** (axum) for auth, groups, messages, and blocks

mod api;
mod auth;
mod config;
mod delivery;
mod error;
mod gateway;
mod membership;
mod presence;
mod rooms;
mod state;
mod sweeper;

use tracing::info;
use tracing_subscriber::EnvFilter;

use veil_store::Database;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,veil_server=debug")),
        )
        .init();

    info!("Starting veil server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.db_path)?;
    // Session counters only reflect sockets of a live process; a crash or
    // restart would otherwise leave users stuck online forever.
    let reset = db.reset_all_sessions()?;
    if reset > 0 {
        info!(users = reset, "reset stale session counters");
    }

    let http_addr = config.http_addr;
    let state = AppState::new(config, db);

    // -----------------------------------------------------------------------
    // 4. Spawn the expiration sweeper
    // -----------------------------------------------------------------------
    sweeper::spawn(state.clone());

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
