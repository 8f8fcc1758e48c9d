//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API and WebSocket gateway.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./veil.db`
    pub db_path: PathBuf,

    /// HMAC secret for signing bearer tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development-only value.
    pub jwt_secret: String,

    /// How long a dropped connection may linger before the user is declared
    /// offline.  Absorbs page reloads and brief network blips.
    /// Env: `OFFLINE_GRACE_SECS`
    /// Default: 8 seconds.
    pub offline_grace: Duration,

    /// Period of the expired-message sweep.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: 60 seconds.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: PathBuf::from("./veil.db"),
            jwt_secret: "veil-dev-secret".to_string(),
            offline_grace: Duration::from_secs(8),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => {
                tracing::warn!("JWT_SECRET not set, using development default");
            }
        }

        if let Ok(val) = std::env::var("OFFLINE_GRACE_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.offline_grace = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.sweep_interval = Duration::from_secs(secs);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.offline_grace, Duration::from_secs(8));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
